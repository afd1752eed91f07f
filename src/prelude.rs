//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use shell_tests::prelude::*;
//! ```

// Core
pub use crate::core::config::MainConfig;
pub use crate::core::errors::{Result, ShtError};

// Platform
pub use crate::platform::simulated::{SimulatedCloudShell, SimulatedConnector};
pub use crate::platform::{ApiConnector, ApiError, CloudShellApi};

// Targets and cases
pub use crate::registry::{Registry, TestCaseKind};
pub use crate::suite::{CaseContext, SuitePlan, TestCase, TestSuite};
pub use crate::target::{DeviceAvailability, Family, TargetDescriptor, TargetHandle, TargetKind};

// Running
pub use crate::logger::events::{RunEvent, RunLoggerConfig, RunLoggerHandle, spawn_logger};
pub use crate::report::{Reporting, SandboxReport, TargetReport};
pub use crate::runner::{CancelToken, Executor, Orchestrator, ReporterKind, RunOutcome};
pub use crate::transport::{FileStore, LocalDirStore, MemoryStore, open_store};

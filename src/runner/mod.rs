//! Running suites: per-suite execution, per-sandbox sessions, CloudShell
//! provisioning and the worker pool that ties them together.

pub mod cancel;
pub mod executor;
pub mod orchestrator;
pub mod provision;
pub mod reporter;
pub mod sandbox;
#[cfg(feature = "signals")]
pub mod signals;

pub use cancel::CancelToken;
pub use executor::{Executor, SuiteRun};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use provision::{CloudShellLease, CloudShellProvisioner};
pub use reporter::{CaseOutcome, CaseStatus, ReporterKind, SuiteSummary};
pub use sandbox::{SandboxRun, SandboxSession, SessionEnv};

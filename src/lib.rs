#![forbid(unsafe_code)]

//! shell_tests: automation test harness for CloudShell shells.
//!
//! A run provisions (or connects to) a CloudShell, installs the shells under
//! test, then works through every configured sandbox on a bounded worker pool:
//! 1. **Sandbox sessions**: reserve, prepare resources, services and deployed apps
//! 2. **Case registry**: pick test cases by family, device availability and driver commands
//! 3. **Executor**: run each target's suite with cooperative cancellation
//!
//! Results roll up into a [`report::Reporting`] tree whose success is the
//! conjunction of every sandbox and target.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use shell_tests::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use shell_tests::core::config::MainConfig;
//! use shell_tests::registry::Registry;
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod platform;
pub mod registry;
pub mod report;
pub mod runner;
pub mod suite;
pub mod target;
pub mod transport;

//! Platform abstraction: the CloudShell API seam, connectors, and the simulated backend.

pub mod api;
pub mod simulated;

use std::sync::Arc;

use crate::core::errors::Result;

pub use api::{ApiError, ApiResult, CloudShellApi};

/// Opens API sessions against CloudShell hosts.
pub trait ApiConnector: Send + Sync {
    /// Session against an existing, already running CloudShell.
    fn connect(
        &self,
        host: &str,
        user: &str,
        password: &str,
        domain: &str,
    ) -> Result<Arc<dyn CloudShellApi>>;

    /// Session against a CloudShell that was just deployed from a topology.
    fn connect_deployed(
        &self,
        host: &str,
        user: &str,
        password: &str,
        domain: &str,
    ) -> Result<Arc<dyn CloudShellApi>>;
}

/// Reachability check for the lab hosts a run depends on.
pub trait HostCheck: Send + Sync {
    fn is_host_alive(&self, host: &str) -> bool;
}

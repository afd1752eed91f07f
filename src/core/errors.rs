//! SHT-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::platform::api::ApiError;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ShtError>;

/// Top-level error type for the shell test harness.
#[derive(Debug, Error)]
pub enum ShtError {
    #[error("[SHT-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SHT-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SHT-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SHT-1004] no test cases registered for family {family}")]
    UnknownFamily { family: String },

    #[error("[SHT-2001] CloudShell call {operation} failed: {source}")]
    Platform {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("[SHT-2002] reservation {reservation_id} is not ready: {details}")]
    ReservationNotReady {
        reservation_id: String,
        details: String,
    },

    #[error("[SHT-2003] CloudShell {host} is not alive: {details}")]
    CloudShellUnreachable { host: String, details: String },

    #[error("[SHT-2004] all {attempts} CloudShell instances failed to start")]
    CloudShellNotStarted {
        attempts: u32,
        #[source]
        last: Box<ShtError>,
    },

    #[error("[SHT-2005] {name} ({host}) is not alive, check it")]
    HostNotAlive { name: String, host: String },

    #[error("[SHT-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SHT-3001] file transfer failure at {location}: {details}")]
    Transport { location: String, details: String },

    #[error("[SHT-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SHT-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SHT-3101] test run interrupted")]
    Interrupted,

    #[error("[SHT-3102] {} sandbox workers failed: {}", .failures.len(), summarize(.failures))]
    WorkersFailed { failures: Vec<(String, ShtError)> },

    #[error("[SHT-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ShtError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SHT-1001",
            Self::MissingConfig { .. } => "SHT-1002",
            Self::ConfigParse { .. } => "SHT-1003",
            Self::UnknownFamily { .. } => "SHT-1004",
            Self::Platform { .. } => "SHT-2001",
            Self::ReservationNotReady { .. } => "SHT-2002",
            Self::CloudShellUnreachable { .. } => "SHT-2003",
            Self::CloudShellNotStarted { .. } => "SHT-2004",
            Self::HostNotAlive { .. } => "SHT-2005",
            Self::Serialization { .. } => "SHT-2101",
            Self::Transport { .. } => "SHT-3001",
            Self::Io { .. } => "SHT-3002",
            Self::ChannelClosed { .. } => "SHT-3003",
            Self::Interrupted => "SHT-3101",
            Self::WorkersFailed { .. } => "SHT-3102",
            Self::Runtime { .. } => "SHT-3900",
        }
    }

    /// Whether recreating the platform instance might resolve the failure.
    ///
    /// Only the provisioning layer retries; every other call site propagates.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CloudShellUnreachable { .. } | Self::ReservationNotReady { .. }
        )
    }

    /// Whether this error belongs to the configuration class (fatal before provisioning).
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::UnknownFamily { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a platform error with the name of the failed operation.
    #[must_use]
    pub const fn platform(operation: &'static str, source: ApiError) -> Self {
        Self::Platform { operation, source }
    }

    /// Collapse collected worker failures: one failure is returned as-is.
    #[must_use]
    pub fn from_worker_failures(mut failures: Vec<(String, Self)>) -> Option<Self> {
        match failures.len() {
            0 => None,
            1 => failures.pop().map(|(_, err)| err),
            _ => Some(Self::WorkersFailed { failures }),
        }
    }
}

fn summarize(failures: &[(String, ShtError)]) -> String {
    failures
        .iter()
        .map(|(sandbox, err)| format!("{sandbox}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for ShtError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ShtError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

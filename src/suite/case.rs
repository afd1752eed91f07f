//! Test case contract and the expected-failure wrapper.

#![allow(missing_docs)]

use std::fmt;

use regex::Regex;

use crate::core::errors::ShtError;
use crate::registry::TestCaseKind;
use crate::suite::CaseContext;
use crate::suite::bodies;

/// Error text every WithoutDevice variant expects from the platform.
pub const CONNECTION_ERROR_PATTERN: &str = r"(SessionManagerException|'ConnectionError')";

// ──────────────────── outcome ────────────────────

/// Why a case did not pass.
#[derive(Debug)]
pub enum CaseFailure {
    /// The body ran and its check did not hold.
    Assertion(String),
    /// The body could not complete: a platform, transport or config error.
    Error(ShtError),
}

impl CaseFailure {
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Text matched against expected-failure patterns.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Assertion(message) => message.clone(),
            Self::Error(err) => err.to_string(),
        }
    }
}

impl fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assertion(message) => write!(f, "AssertionError: {message}"),
            Self::Error(err) => write!(f, "{err}"),
        }
    }
}

impl From<ShtError> for CaseFailure {
    fn from(err: ShtError) -> Self {
        Self::Error(err)
    }
}

pub type CaseResult = std::result::Result<(), CaseFailure>;

// ──────────────────── contract ────────────────────

/// One behavioral check against one target.
pub trait TestCase: Send + Sync {
    fn kind(&self) -> TestCaseKind;
    fn method(&self) -> &'static str;
    fn target(&self) -> &str;
    fn run(&self, ctx: &CaseContext) -> CaseResult;

    /// `Kind.method`, the key used in `expected_failures`.
    fn qualified_name(&self) -> String {
        format!("{}.{}", self.kind(), self.method())
    }

    /// `Kind.method-target`, unique within a run.
    fn id(&self) -> String {
        format!("{}-{}", self.qualified_name(), self.target())
    }
}

/// A registry case: dispatches to the body for `(kind, method)`.
#[derive(Debug, Clone)]
pub struct RegisteredCase {
    kind: TestCaseKind,
    method: &'static str,
    target: String,
}

impl RegisteredCase {
    #[must_use]
    pub fn new(kind: TestCaseKind, method: &'static str, target: impl Into<String>) -> Self {
        Self {
            kind,
            method,
            target: target.into(),
        }
    }
}

impl TestCase for RegisteredCase {
    fn kind(&self) -> TestCaseKind {
        self.kind
    }

    fn method(&self) -> &'static str {
        self.method
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn run(&self, ctx: &CaseContext) -> CaseResult {
        bodies::run(self.kind, self.method, ctx)
    }
}

/// Inverts an inner case: passes only when the inner case fails with a
/// message matching `pattern`.
pub struct ExpectedFailureCase {
    inner: Box<dyn TestCase>,
    pattern: Regex,
}

impl ExpectedFailureCase {
    #[must_use]
    pub fn new(inner: Box<dyn TestCase>, pattern: Regex) -> Self {
        Self { inner, pattern }
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl TestCase for ExpectedFailureCase {
    fn kind(&self) -> TestCaseKind {
        self.inner.kind()
    }

    fn method(&self) -> &'static str {
        self.inner.method()
    }

    fn target(&self) -> &str {
        self.inner.target()
    }

    fn run(&self, ctx: &CaseContext) -> CaseResult {
        match self.inner.run(ctx) {
            Ok(()) => Err(CaseFailure::assertion(format!(
                "expected a failure matching {:?} but the case passed",
                self.pattern.as_str()
            ))),
            Err(failure) if self.pattern.is_match(&failure.message()) => Ok(()),
            Err(failure) => Err(CaseFailure::assertion(format!(
                "expected a failure matching {:?}, got: {failure}",
                self.pattern.as_str()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::api::ApiError;
    use crate::suite::tests::dead_context;

    struct Scripted {
        outcome: fn() -> CaseResult,
    }

    impl TestCase for Scripted {
        fn kind(&self) -> TestCaseKind {
            TestCaseKind::SaveConfig
        }
        fn method(&self) -> &'static str {
            "save_running_config"
        }
        fn target(&self) -> &str {
            "r1"
        }
        fn run(&self, _ctx: &CaseContext) -> CaseResult {
            (self.outcome)()
        }
    }

    fn wrapped(outcome: fn() -> CaseResult, pattern: &str) -> ExpectedFailureCase {
        ExpectedFailureCase::new(Box::new(Scripted { outcome }), Regex::new(pattern).unwrap())
    }

    #[test]
    fn ids_combine_kind_method_and_target() {
        let case = RegisteredCase::new(TestCaseKind::Connectivity, "connectivity", "sw1");
        assert_eq!(case.qualified_name(), "Connectivity.connectivity");
        assert_eq!(case.id(), "Connectivity.connectivity-sw1");
    }

    #[test]
    fn matching_failure_passes() {
        let ctx = dead_context();
        let case = wrapped(
            || {
                let api_error = ApiError::new("100", "not supported by device");
                Err(ShtError::platform("execute_command", api_error).into())
            },
            "not supported",
        );
        assert!(case.run(&ctx).is_ok());
        assert_eq!(case.id(), "SaveConfig.save_running_config-r1");
    }

    #[test]
    fn assertion_failures_can_be_expected_too() {
        let ctx = dead_context();
        let case = wrapped(|| Err(CaseFailure::assertion("file missing in store")), "file missing");
        assert!(case.run(&ctx).is_ok());
    }

    #[test]
    fn non_matching_failure_fails() {
        let ctx = dead_context();
        let case = wrapped(|| Err(CaseFailure::assertion("timeout")), "not supported");
        let failure = case.run(&ctx).unwrap_err();
        assert!(!failure.is_error());
        assert!(failure.message().contains("timeout"));
    }

    #[test]
    fn unexpected_success_fails() {
        let ctx = dead_context();
        let case = wrapped(|| Ok(()), "not supported");
        let failure = case.run(&ctx).unwrap_err();
        assert!(failure.message().contains("but the case passed"));
    }

    #[test]
    fn connection_pattern_matches_platform_text() {
        let pattern = Regex::new(CONNECTION_ERROR_PATTERN).unwrap();
        assert!(pattern.is_match("SessionManagerException: Failed to open session"));
        assert!(pattern.is_match("error 'ConnectionError' raised"));
        assert!(!pattern.is_match("ConnectionError without quotes"));
    }
}

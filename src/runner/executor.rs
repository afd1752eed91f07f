//! Runs a bound suite case by case, honoring the shared stop flag.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use crate::logger::events::{RunEvent, RunLoggerHandle};
use crate::runner::cancel::CancelToken;
use crate::runner::reporter::{CaseOutcome, CaseStatus, ReporterKind, SuiteSummary};
use crate::suite::{CaseFailure, TestSuite};

/// Details attached to cases that never started.
pub const CANCELLED_REASON: &str = "run cancelled";

/// Everything a suite run produced.
#[derive(Debug, Clone)]
pub struct SuiteRun {
    pub success: bool,
    pub text: String,
    pub outcomes: Vec<CaseOutcome>,
    pub duration: Duration,
    pub cancelled: bool,
}

pub struct Executor {
    cancel: CancelToken,
    logger: RunLoggerHandle,
    reporter: ReporterKind,
    sandbox: String,
}

impl Executor {
    #[must_use]
    pub fn new(cancel: CancelToken, logger: RunLoggerHandle) -> Self {
        Self {
            cancel,
            logger,
            reporter: ReporterKind::detect(),
            sandbox: String::new(),
        }
    }

    #[must_use]
    pub const fn with_reporter(mut self, reporter: ReporterKind) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_sandbox(mut self, sandbox: impl Into<String>) -> Self {
        self.sandbox = sandbox.into();
        self
    }

    /// Cases not started yet will be skipped; a running case is left to finish.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// `(success, report_text)` for one suite.
    pub fn run(&self, suite: &TestSuite) -> (bool, String) {
        let run = self.run_detailed(suite);
        (run.success, run.text)
    }

    pub fn run_detailed(&self, suite: &TestSuite) -> SuiteRun {
        let started = Instant::now();
        let mut reporter = self.reporter.reporter();
        reporter.suite_started(suite.target(), suite.len());
        self.logger.send(RunEvent::SuiteStarted {
            sandbox: self.sandbox.clone(),
            target: suite.target().to_string(),
            cases: suite.len(),
        });

        let mut outcomes = Vec::with_capacity(suite.len());
        let mut cancelled = false;
        for case in suite.cases() {
            let id = case.id();
            reporter.case_started(&id);

            let case_started = Instant::now();
            let outcome = if self.cancel.is_cancelled() {
                cancelled = true;
                CaseOutcome {
                    id,
                    method: case.method().to_string(),
                    status: CaseStatus::Skipped,
                    error: false,
                    details: Some(CANCELLED_REASON.to_string()),
                    duration_ms: 0,
                }
            } else {
                let result = case.run(suite.context());
                let (status, error, details) = match result {
                    Ok(()) => (CaseStatus::Passed, false, None),
                    Err(failure @ CaseFailure::Assertion(_)) => {
                        (CaseStatus::Failed, false, Some(failure.to_string()))
                    }
                    Err(failure @ CaseFailure::Error(_)) => {
                        (CaseStatus::Failed, true, Some(failure.to_string()))
                    }
                };
                CaseOutcome {
                    id,
                    method: case.method().to_string(),
                    status,
                    error,
                    details,
                    duration_ms: millis(case_started.elapsed()),
                }
            };

            reporter.case_finished(&outcome);
            self.logger.send(RunEvent::CaseFinished {
                sandbox: self.sandbox.clone(),
                target: suite.target().to_string(),
                case: outcome.id.clone(),
                status: if outcome.error {
                    "error".to_string()
                } else {
                    outcome.status.as_str().to_string()
                },
                duration_ms: outcome.duration_ms,
                details: outcome.details.clone(),
            });
            outcomes.push(outcome);
        }

        let duration = started.elapsed();
        let summary = SuiteSummary::from_outcomes(&outcomes, duration);
        reporter.suite_finished(suite.target(), &summary);
        let success = summary.is_success();
        self.logger.send(RunEvent::SuiteFinished {
            sandbox: self.sandbox.clone(),
            target: suite.target().to_string(),
            success,
            duration_ms: millis(duration),
        });

        SuiteRun {
            success,
            text: reporter.into_text(),
            outcomes,
            duration,
            cancelled,
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

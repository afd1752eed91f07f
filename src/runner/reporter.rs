//! Suite reporters: an xUnit-style verbose text report and TeamCity service
//! messages. Both render into a string that becomes the target's report text.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

/// Environment variable TeamCity sets on its build agents.
pub const TEAMCITY_ENV: &str = "TEAMCITY_VERSION";

const HEAVY_RULE: &str =
    "======================================================================";
const LIGHT_RULE: &str =
    "----------------------------------------------------------------------";

// ──────────────────── outcomes ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    Passed,
    Failed,
    Skipped,
}

impl CaseStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseOutcome {
    /// `Kind.method-target`.
    pub id: String,
    pub method: String,
    pub status: CaseStatus,
    /// The body could not complete, as opposed to a failed check.
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub duration_ms: u64,
}

impl CaseOutcome {
    #[must_use]
    pub fn verdict(&self) -> &'static str {
        match (self.status, self.error) {
            (CaseStatus::Passed, _) => "ok",
            (CaseStatus::Failed, true) => "ERROR",
            (CaseStatus::Failed, false) => "FAIL",
            (CaseStatus::Skipped, _) => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuiteSummary {
    pub run: usize,
    pub failures: usize,
    pub errors: usize,
    pub skipped: usize,
    pub duration: Duration,
}

impl SuiteSummary {
    #[must_use]
    pub fn from_outcomes(outcomes: &[CaseOutcome], duration: Duration) -> Self {
        let mut summary = Self {
            duration,
            ..Self::default()
        };
        // Skipped cases count toward the ran total.
        summary.run = outcomes.len();
        for outcome in outcomes {
            match (outcome.status, outcome.error) {
                (CaseStatus::Passed, _) => {}
                (CaseStatus::Failed, true) => summary.errors += 1,
                (CaseStatus::Failed, false) => summary.failures += 1,
                (CaseStatus::Skipped, _) => summary.skipped += 1,
            }
        }
        summary
    }

    /// Skipped cases only come from cancellation, so they fail the suite.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failures == 0 && self.errors == 0 && self.skipped == 0
    }
}

// ──────────────────── reporter seam ────────────────────

pub trait Reporter {
    fn suite_started(&mut self, suite: &str, cases: usize);
    fn case_started(&mut self, id: &str);
    fn case_finished(&mut self, outcome: &CaseOutcome);
    fn suite_finished(&mut self, suite: &str, summary: &SuiteSummary);
    fn into_text(self: Box<Self>) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterKind {
    Text,
    Teamcity,
}

impl ReporterKind {
    /// TeamCity messages under a TeamCity agent, plain text otherwise.
    #[must_use]
    pub fn detect() -> Self {
        Self::detect_from(|name| std::env::var(name).ok())
    }

    pub fn detect_from<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(TEAMCITY_ENV).is_some_and(|value| !value.trim().is_empty()) {
            Self::Teamcity
        } else {
            Self::Text
        }
    }

    #[must_use]
    pub fn reporter(self) -> Box<dyn Reporter> {
        match self {
            Self::Text => Box::new(TextReporter::default()),
            Self::Teamcity => Box::new(TeamcityReporter::default()),
        }
    }
}

// ──────────────────── text ────────────────────

#[derive(Debug, Default)]
pub struct TextReporter {
    out: String,
    problems: Vec<CaseOutcome>,
}

impl Reporter for TextReporter {
    fn suite_started(&mut self, _suite: &str, _cases: usize) {}

    fn case_started(&mut self, _id: &str) {}

    fn case_finished(&mut self, outcome: &CaseOutcome) {
        let verdict = match outcome.status {
            CaseStatus::Skipped => format!(
                "skipped {:?}",
                outcome.details.as_deref().unwrap_or_default()
            ),
            _ => outcome.verdict().to_string(),
        };
        let _ = writeln!(self.out, "{} ({}) ... {verdict}", outcome.method, outcome.id);
        if outcome.status == CaseStatus::Failed {
            self.problems.push(outcome.clone());
        }
    }

    fn suite_finished(&mut self, _suite: &str, summary: &SuiteSummary) {
        for problem in &self.problems {
            let _ = writeln!(self.out, "\n{HEAVY_RULE}");
            let verdict = problem.verdict();
            let _ = writeln!(self.out, "{verdict}: {} ({})", problem.method, problem.id);
            let _ = writeln!(self.out, "{LIGHT_RULE}");
            let _ = writeln!(self.out, "{}", problem.details.as_deref().unwrap_or_default());
        }
        let _ = writeln!(self.out, "\n{LIGHT_RULE}");
        let _ = writeln!(
            self.out,
            "Ran {} test{} in {:.3}s\n",
            summary.run,
            if summary.run == 1 { "" } else { "s" },
            summary.duration.as_secs_f64()
        );

        let mut counts = Vec::new();
        if summary.failures > 0 {
            counts.push(format!("failures={}", summary.failures));
        }
        if summary.errors > 0 {
            counts.push(format!("errors={}", summary.errors));
        }
        if summary.skipped > 0 {
            counts.push(format!("skipped={}", summary.skipped));
        }
        if summary.is_success() {
            let _ = writeln!(self.out, "OK");
        } else {
            let _ = writeln!(self.out, "FAILED ({})", counts.join(", "));
        }
    }

    fn into_text(self: Box<Self>) -> String {
        self.out
    }
}

// ──────────────────── teamcity ────────────────────

#[derive(Debug, Default)]
pub struct TeamcityReporter {
    out: String,
}

/// TeamCity service-message value escaping.
#[must_use]
pub fn teamcity_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '|' => escaped.push_str("||"),
            '\'' => escaped.push_str("|'"),
            '\n' => escaped.push_str("|n"),
            '\r' => escaped.push_str("|r"),
            '[' => escaped.push_str("|["),
            ']' => escaped.push_str("|]"),
            other => escaped.push(other),
        }
    }
    escaped
}

impl TeamcityReporter {
    fn message(&mut self, name: &str, attributes: &[(&str, &str)]) {
        let _ = write!(self.out, "##teamcity[{name}");
        for (key, value) in attributes {
            let _ = write!(self.out, " {key}='{}'", teamcity_escape(value));
        }
        let _ = writeln!(self.out, "]");
    }
}

impl Reporter for TeamcityReporter {
    fn suite_started(&mut self, suite: &str, _cases: usize) {
        self.message("testSuiteStarted", &[("name", suite)]);
    }

    fn case_started(&mut self, id: &str) {
        self.message("testStarted", &[("name", id)]);
    }

    fn case_finished(&mut self, outcome: &CaseOutcome) {
        let details = outcome.details.as_deref().unwrap_or_default();
        match outcome.status {
            CaseStatus::Passed => {}
            CaseStatus::Failed => {
                let message = if outcome.error { "Error" } else { "Failure" };
                self.message(
                    "testFailed",
                    &[("name", outcome.id.as_str()), ("message", message), ("details", details)],
                );
            }
            CaseStatus::Skipped => {
                self.message("testIgnored", &[("name", outcome.id.as_str()), ("message", details)]);
            }
        }
        let duration = outcome.duration_ms.to_string();
        self.message(
            "testFinished",
            &[("name", outcome.id.as_str()), ("duration", duration.as_str())],
        );
    }

    fn suite_finished(&mut self, suite: &str, _summary: &SuiteSummary) {
        self.message("testSuiteFinished", &[("name", suite)]);
    }

    fn into_text(self: Box<Self>) -> String {
        self.out
    }
}

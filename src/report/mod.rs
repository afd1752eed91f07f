//! Report tree: per-target leaves rolled up per sandbox and per run.

#![allow(missing_docs)]

use serde::Serialize;

use crate::core::errors::Result;
use crate::target::{Family, TargetDescriptor, TargetKind};

const SANDBOX_SEPARATOR: &str =
    "\n\n------------------------------------------------------------\n\n";

const fn success_word(success: bool) -> &'static str {
    if success { "successful" } else { "unsuccessful" }
}

// ──────────────────── leaves ────────────────────

/// Outcome of one target's suite.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub name: String,
    pub kind: TargetKind,
    pub ip: Option<String>,
    pub device_type: String,
    pub family: Family,
    pub is_success: bool,
    /// Captured runner output.
    pub test_result: String,
}

impl TargetReport {
    #[must_use]
    pub fn from_descriptor(
        descriptor: &TargetDescriptor,
        is_success: bool,
        test_result: impl Into<String>,
    ) -> Self {
        Self {
            name: descriptor.name.clone(),
            kind: descriptor.kind,
            ip: descriptor.device_ip.clone(),
            device_type: descriptor.availability.to_string(),
            family: descriptor.family,
            is_success,
            test_result: test_result.into(),
        }
    }

    #[must_use]
    pub fn render_text(&self) -> String {
        let header = match self.kind {
            TargetKind::Service => format!(
                "Service name: {}, Type: {}, Family: {}",
                self.name, self.device_type, self.family
            ),
            kind => format!(
                "{kind} name: {}, IP: {}, Type: {}, Family: {}",
                self.name,
                self.ip.as_deref().unwrap_or("-"),
                self.device_type,
                self.family
            ),
        };
        format!(
            "{header}\nTest for device was {}\n{}",
            success_word(self.is_success),
            self.test_result
        )
    }
}

// ──────────────────── sandbox ────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SandboxReport {
    pub name: String,
    /// The sandbox's own status: false when it could not be set up or released.
    pub status: bool,
    pub details: String,
    pub deployment_resources: Vec<TargetReport>,
    pub resources: Vec<TargetReport>,
    pub services: Vec<TargetReport>,
}

impl SandboxReport {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: true,
            details: String::new(),
            deployment_resources: Vec::new(),
            resources: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Mark the sandbox itself failed, keeping any target reports already recorded.
    #[must_use]
    pub fn with_failure(mut self, details: impl Into<String>) -> Self {
        let details = details.into();
        self.status = false;
        if self.details.is_empty() {
            self.details = details;
        } else {
            self.details = format!("{}\n{details}", self.details);
        }
        self
    }

    pub fn targets(&self) -> impl Iterator<Item = &TargetReport> {
        self.deployment_resources
            .iter()
            .chain(&self.resources)
            .chain(&self.services)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status && self.targets().all(|target| target.is_success)
    }

    #[must_use]
    pub fn render_text(&self) -> String {
        let mut blocks = vec![format!(
            "Sandbox name: {}\nTests for sandbox was {}\n{}",
            self.name,
            success_word(self.is_success()),
            self.details
        )];
        blocks.extend(self.targets().map(TargetReport::render_text));
        blocks.join("\n\n")
    }
}

// ──────────────────── run ────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct Reporting {
    pub sandboxes: Vec<SandboxReport>,
}

/// JSON shape of a whole run.
#[derive(Serialize)]
struct ReportingDocument<'a> {
    is_success: bool,
    sandboxes: &'a [SandboxReport],
}

impl Reporting {
    pub fn add(&mut self, report: SandboxReport) {
        self.sandboxes.push(report);
    }

    /// True iff every sandbox and every target in it succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.sandboxes.iter().all(SandboxReport::is_success)
    }

    #[must_use]
    pub fn render_text(&self) -> String {
        self.sandboxes
            .iter()
            .map(SandboxReport::render_text)
            .collect::<Vec<_>>()
            .join(SANDBOX_SEPARATOR)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&ReportingDocument {
            is_success: self.is_success(),
            sandboxes: &self.sandboxes,
        })?)
    }
}

impl std::fmt::Display for Reporting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::DeviceAvailability;
    use proptest::prelude::*;

    fn target(name: &str, kind: TargetKind, ok: bool) -> TargetReport {
        let descriptor = TargetDescriptor::new(
            name,
            kind,
            Family::Router,
            DeviceAvailability::RealDevice,
            Vec::new(),
        )
        .with_device_ip(Some("10.0.0.1".to_string()));
        TargetReport::from_descriptor(&descriptor, ok, "Ran 1 test in 0.001s\n\nOK")
    }

    #[test]
    fn resource_block_matches_legacy_layout() {
        let text = target("r1", TargetKind::Resource, true).render_text();
        assert_eq!(
            text,
            "Resource name: r1, IP: 10.0.0.1, Type: Real device, Family: CS_Router\n\
             Test for device was successful\n\
             Ran 1 test in 0.001s\n\nOK"
        );
    }

    #[test]
    fn service_block_omits_ip() {
        let text = target("ctrl", TargetKind::Service, false).render_text();
        assert!(text.starts_with("Service name: ctrl, Type: Real device"));
        assert!(text.contains("Test for device was unsuccessful"));
    }

    #[test]
    fn sandbox_rolls_up_children() {
        let mut sandbox = SandboxReport::new("sb");
        sandbox.resources.push(target("r1", TargetKind::Resource, true));
        assert!(sandbox.is_success());
        sandbox.services.push(target("s1", TargetKind::Service, false));
        assert!(!sandbox.is_success());

        let text = sandbox.render_text();
        assert!(text.starts_with("Sandbox name: sb\nTests for sandbox was unsuccessful\n"));
        assert!(text.contains("\n\nResource name: r1"));
        assert!(text.contains("\n\nService name: s1"));
    }

    #[test]
    fn failed_sandbox_keeps_recorded_targets() {
        let mut sandbox = SandboxReport::new("sb");
        sandbox.resources.push(target("r1", TargetKind::Resource, true));
        let sandbox = sandbox.with_failure("release failed");
        assert!(!sandbox.is_success());
        assert_eq!(sandbox.resources.len(), 1);
        assert_eq!(sandbox.details, "release failed");
    }

    #[test]
    fn run_text_separates_sandboxes_and_json_carries_verdict() {
        let mut reporting = Reporting::default();
        reporting.add(SandboxReport::new("a"));
        reporting.add(SandboxReport::new("b").with_failure("reservation not ready"));
        assert!(!reporting.is_success());
        assert!(reporting.render_text().contains("------------"));

        let json: serde_json::Value = serde_json::from_str(&reporting.to_json().unwrap()).unwrap();
        assert_eq!(json["is_success"], false);
        assert_eq!(json["sandboxes"][1]["details"], "reservation not ready");
        assert_eq!(json["sandboxes"][0]["status"], true);
    }

    #[test]
    fn empty_run_is_successful() {
        assert!(Reporting::default().is_success());
        assert_eq!(Reporting::default().render_text(), "");
    }

    proptest! {
        #[test]
        fn success_is_conjunction_of_every_node(
            statuses in prop::collection::vec(
                (any::<bool>(), prop::collection::vec(any::<bool>(), 0..4)),
                0..5,
            ),
        ) {
            let mut reporting = Reporting::default();
            for (index, (own, leaves)) in statuses.iter().enumerate() {
                let mut sandbox = SandboxReport::new(format!("sb{index}"));
                sandbox.status = *own;
                for (leaf, ok) in leaves.iter().enumerate() {
                    sandbox.resources.push(target(&format!("r{leaf}"), TargetKind::Resource, *ok));
                }
                reporting.add(sandbox);
            }
            let expected = statuses
                .iter()
                .all(|(own, leaves)| *own && leaves.iter().all(|ok| *ok));
            prop_assert_eq!(reporting.is_success(), expected);
        }
    }
}

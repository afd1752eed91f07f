//! Immutable target metadata consumed by the registry and suite builder.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::config::TestsConfig;
use crate::target::{DeviceAvailability, Family, TargetKind};

/// One testable entity as seen by the suite builder.
///
/// Built once per run from configuration plus the platform's answer for
/// family and driver commands. Only `finished_provisioning` changes afterwards.
#[derive(Debug)]
pub struct TargetDescriptor {
    pub name: String,
    pub kind: TargetKind,
    pub family: Family,
    pub model: String,
    pub device_ip: Option<String>,
    pub availability: DeviceAvailability,
    /// Driver commands in the order the platform reported them.
    pub supported_commands: Vec<String>,
    pub tests: TestsConfig,
    /// Resource this target drives (traffic generator controllers).
    pub related_resource: Option<String>,
    finished_provisioning: AtomicBool,
}

impl TargetDescriptor {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kind: TargetKind,
        family: Family,
        availability: DeviceAvailability,
        supported_commands: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            family,
            model: String::new(),
            device_ip: None,
            availability,
            supported_commands,
            tests: TestsConfig::default(),
            related_resource: None,
            finished_provisioning: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_device_ip(mut self, device_ip: Option<String>) -> Self {
        self.device_ip = device_ip.filter(|ip| !ip.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_tests(mut self, tests: TestsConfig) -> Self {
        self.tests = tests;
        self
    }

    #[must_use]
    pub fn with_related_resource(mut self, related: Option<String>) -> Self {
        self.related_resource = related;
        self
    }

    /// Qualified case name (`SaveConfig.save_running_config`) -> error pattern.
    #[must_use]
    pub fn expected_failures(&self) -> &BTreeMap<String, String> {
        &self.tests.expected_failures
    }

    /// Case-insensitive membership test over the driver commands.
    #[must_use]
    pub fn supports(&self, command: &str) -> bool {
        self.supported_commands
            .iter()
            .any(|c| c.eq_ignore_ascii_case(command))
    }

    pub fn mark_provisioned(&self) {
        self.finished_provisioning.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_provisioned(&self) -> bool {
        self.finished_provisioning.load(Ordering::Acquire)
    }
}

impl Clone for TargetDescriptor {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            kind: self.kind,
            family: self.family,
            model: self.model.clone(),
            device_ip: self.device_ip.clone(),
            availability: self.availability,
            supported_commands: self.supported_commands.clone(),
            tests: self.tests.clone(),
            related_resource: self.related_resource.clone(),
            finished_provisioning: AtomicBool::new(self.is_provisioned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TargetDescriptor {
        TargetDescriptor::new(
            "r1",
            TargetKind::Resource,
            Family::Router,
            DeviceAvailability::RealDevice,
            vec!["Autoload".to_string(), "run_custom_command".to_string()],
        )
        .with_model("Cisco IOS Router")
        .with_device_ip(Some("10.0.0.1".to_string()))
    }

    #[test]
    fn supports_is_case_insensitive() {
        let descriptor = router();
        assert!(descriptor.supports("autoload"));
        assert!(descriptor.supports("RUN_CUSTOM_COMMAND"));
        assert!(!descriptor.supports("save"));
    }

    #[test]
    fn provisioning_flag_flips_once_and_survives_clone() {
        let descriptor = router();
        assert!(!descriptor.is_provisioned());
        descriptor.mark_provisioned();
        assert!(descriptor.is_provisioned());
        assert!(descriptor.clone().is_provisioned());
    }

    #[test]
    fn blank_device_ip_is_dropped() {
        let descriptor = router().with_device_ip(Some(" ".to_string()));
        assert!(descriptor.device_ip.is_none());
    }
}

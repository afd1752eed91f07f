//! A target bound to a live reservation: every driver operation a test body needs.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::errors::{Result, ShtError};
use crate::platform::api::{CloudShellApi, CommandParams, ResourceInfo, TargetType};
use crate::target::{TargetDescriptor, TargetKind};

pub struct TargetHandle {
    descriptor: TargetDescriptor,
    api: Arc<dyn CloudShellApi>,
    reservation_id: String,
    /// Child path relative to the target (`Chassis 1/Port 1`) -> attributes.
    children_attributes: BTreeMap<String, BTreeMap<String, String>>,
    autoload_finished: AtomicBool,
}

impl std::fmt::Debug for TargetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetHandle")
            .field("name", &self.descriptor.name)
            .field("reservation_id", &self.reservation_id)
            .field("autoload_finished", &self.is_autoload_finished())
            .finish_non_exhaustive()
    }
}

impl TargetHandle {
    #[must_use]
    pub fn new(
        descriptor: TargetDescriptor,
        api: Arc<dyn CloudShellApi>,
        reservation_id: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            api,
            reservation_id: reservation_id.into(),
            children_attributes: BTreeMap::new(),
            autoload_finished: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_children_attributes(
        mut self,
        children_attributes: BTreeMap<String, BTreeMap<String, String>>,
    ) -> Self {
        self.children_attributes = children_attributes;
        self
    }

    #[must_use]
    pub fn descriptor(&self) -> &TargetDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    #[must_use]
    pub fn reservation_id(&self) -> &str {
        &self.reservation_id
    }

    #[must_use]
    pub fn api(&self) -> &Arc<dyn CloudShellApi> {
        &self.api
    }

    #[must_use]
    pub fn is_autoload_finished(&self) -> bool {
        self.autoload_finished.load(Ordering::Acquire)
    }

    const fn target_type(&self) -> TargetType {
        match self.descriptor.kind {
            TargetKind::Resource | TargetKind::DeploymentResource => TargetType::Resource,
            TargetKind::Service => TargetType::Service,
        }
    }

    // ──────────────────── structure ────────────────────

    /// Discover the child tree. A resource without a bound driver (code 129)
    /// gets the driver re-applied and a second autoload attempt.
    pub fn autoload(&self) -> Result<()> {
        let name = self.name();
        if let Err(err) = self.api.resource_autoload(name) {
            if !err.is_missing_driver() {
                return Err(ShtError::platform("resource_autoload", err));
            }
            self.api
                .update_driver_for_resource(name, &self.descriptor.model)
                .map_err(|e| ShtError::platform("update_driver_for_resource", e))?;
            self.api
                .resource_autoload(name)
                .map_err(|e| ShtError::platform("resource_autoload", e))?;
        }

        self.autoload_finished.store(true, Ordering::Release);
        if !self.children_attributes.is_empty() {
            self.set_children_attributes()?;
        }
        Ok(())
    }

    fn set_children_attributes(&self) -> Result<()> {
        for (child, attributes) in &self.children_attributes {
            let child_name = format!("{}/{child}", self.name());
            let info = self
                .api
                .get_resource_details(&child_name)
                .map_err(|e| ShtError::platform("get_resource_details", e))?;
            for (attribute, value) in attributes {
                let namespace = child_attribute_namespace(&info, attribute);
                let single = BTreeMap::from([(attribute.clone(), value.clone())]);
                self.api
                    .set_resource_attributes(&info.name, &namespace, &single)
                    .map_err(|e| ShtError::platform("set_resource_attributes", e))?;
            }
        }
        Ok(())
    }

    pub fn details(&self) -> Result<ResourceInfo> {
        self.api
            .get_resource_details(self.name())
            .map_err(|e| ShtError::platform("get_resource_details", e))
    }

    // ──────────────────── driver commands ────────────────────

    pub fn execute(&self, command: &str, params: &CommandParams) -> Result<String> {
        self.api
            .execute_command(
                &self.reservation_id,
                self.name(),
                self.target_type(),
                command,
                params,
            )
            .map_err(|e| ShtError::platform("execute_command", e))
    }

    pub fn health_check(&self) -> Result<String> {
        self.execute("health_check", &CommandParams::new())
    }

    pub fn run_custom_command(&self, command: &str) -> Result<String> {
        self.execute("run_custom_command", &params([("custom_command", command)]))
    }

    pub fn run_custom_config_command(&self, command: &str) -> Result<String> {
        self.execute(
            "run_custom_config_command",
            &params([("custom_command", command)]),
        )
    }

    /// Returns the saved file name.
    pub fn save(&self, folder_path: &str, configuration_type: &str) -> Result<String> {
        self.execute(
            "save",
            &params([
                ("folder_path", folder_path),
                ("configuration_type", configuration_type),
            ]),
        )
    }

    pub fn orchestration_save(&self, mode: &str, custom_params: &str) -> Result<String> {
        self.execute(
            "orchestration_save",
            &params([("mode", mode), ("custom_params", custom_params)]),
        )
    }

    pub fn restore(
        &self,
        path: &str,
        configuration_type: &str,
        restore_method: &str,
    ) -> Result<String> {
        self.execute(
            "restore",
            &params([
                ("path", path),
                ("configuration_type", configuration_type),
                ("restore_method", restore_method),
            ]),
        )
    }

    pub fn orchestration_restore(
        &self,
        saved_artifact_info: &str,
        custom_params: &str,
    ) -> Result<String> {
        self.execute(
            "orchestration_restore",
            &params([
                ("saved_artifact_info", saved_artifact_info),
                ("custom_params", custom_params),
            ]),
        )
    }

    // ──────────────────── traffic generator controller ────────────────────

    pub fn load_config(&self, config_file_location: &str, extra: &CommandParams) -> Result<String> {
        let mut merged = extra.clone();
        merged.insert(
            "config_file_location".to_string(),
            config_file_location.to_string(),
        );
        self.execute("load_config", &merged)
    }

    pub fn start_traffic(&self, extra: &CommandParams) -> Result<String> {
        self.execute("start_traffic", extra)
    }

    pub fn stop_traffic(&self, extra: &CommandParams) -> Result<String> {
        self.execute("stop_traffic", extra)
    }

    pub fn get_statistics(&self, extra: &CommandParams) -> Result<String> {
        self.execute("get_statistics", extra)
    }

    pub fn get_test_file(&self, test_name: &str) -> Result<String> {
        self.execute("get_test_file", &params([("test_name", test_name)]))
    }
}

fn params<const N: usize>(pairs: [(&str, &str); N]) -> CommandParams {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Namespace of an existing `Namespace.Attribute` entry, else the child's model.
fn child_attribute_namespace(info: &ResourceInfo, attribute: &str) -> String {
    info.attributes
        .iter()
        .filter_map(|attr| attr.name.rsplit_once('.'))
        .find(|(_, name)| *name == attribute)
        .map_or_else(|| info.model.clone(), |(namespace, _)| namespace.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{SimulatedShellConfig, SimulatorConfig};
    use crate::platform::ApiError;
    use crate::platform::simulated::SimulatedCloudShell;
    use crate::target::{DeviceAvailability, Family};
    use crate::transport::{FileStore, MemoryStore};

    const MODEL: &str = "Cisco IOS Router 2G";

    fn simulator() -> Arc<SimulatedCloudShell> {
        let config = SimulatorConfig {
            shells: vec![SimulatedShellConfig {
                path: "cisco_ios.zip".to_string(),
                model: MODEL.to_string(),
                family: "CS_Router".to_string(),
                commands: vec![
                    "run_custom_command".to_string(),
                    "save".to_string(),
                    "restore".to_string(),
                ],
                service: false,
            }],
            ..SimulatorConfig::default()
        };
        let store: Arc<dyn FileStore> = Arc::new(MemoryStore::new("ftp://10.0.0.5/configs"));
        let sim = Arc::new(SimulatedCloudShell::new("cs.local", config, store));
        sim.install_shell("cisco_ios.zip").unwrap();
        sim
    }

    fn handle_for(sim: &Arc<SimulatedCloudShell>, address: &str) -> TargetHandle {
        let reservation = sim.create_reservation("sb", 60).unwrap();
        let name = sim.create_resource("r1", MODEL, address).unwrap();
        sim.add_resource_to_reservation(&reservation, &name).unwrap();
        let descriptor = TargetDescriptor::new(
            name,
            TargetKind::Resource,
            Family::Router,
            DeviceAvailability::RealDevice,
            Vec::new(),
        )
        .with_model(MODEL);
        let api: Arc<dyn CloudShellApi> = sim.clone();
        TargetHandle::new(descriptor, api, reservation)
    }

    #[test]
    fn autoload_sets_flag_and_builds_tree() {
        let sim = simulator();
        let handle = handle_for(&sim, "10.0.0.1");
        assert!(!handle.is_autoload_finished());
        handle.autoload().unwrap();
        assert!(handle.is_autoload_finished());
        assert!(handle.details().unwrap().structure().contains("CS_Port"));
    }

    #[test]
    fn missing_driver_triggers_driver_update_and_retry() {
        let sim = simulator();
        let handle = handle_for(&sim, "10.0.0.1");
        sim.fail_next("resource_autoload", ApiError::new("129", "no driver associated"));

        handle.autoload().unwrap();
        assert_eq!(sim.calls("update_driver_for_resource"), 1);
        assert_eq!(sim.calls("resource_autoload"), 2);
        assert!(handle.is_autoload_finished());
    }

    #[test]
    fn other_autoload_errors_propagate() {
        let sim = simulator();
        let handle = handle_for(&sim, "127.0.0.1");
        let err = handle.autoload().unwrap_err();
        assert_eq!(err.code(), "SHT-2001");
        assert!(err.to_string().contains("SessionManagerException"));
        assert!(!handle.is_autoload_finished());
        assert_eq!(sim.calls("update_driver_for_resource"), 0);
    }

    #[test]
    fn children_attributes_applied_after_autoload() {
        let sim = simulator();
        let children = BTreeMap::from([(
            "Chassis 1/Port 1".to_string(),
            BTreeMap::from([("Duplex".to_string(), "Full".to_string())]),
        )]);
        let handle = handle_for(&sim, "10.0.0.1").with_children_attributes(children);
        handle.autoload().unwrap();

        let port = sim.get_resource_details("r1/Chassis 1/Port 1").unwrap();
        assert_eq!(port.attribute("Duplex"), Some("Full"));
        assert!(
            port.attributes
                .iter()
                .any(|attr| attr.name == "Generic Port.Duplex")
        );
    }

    #[test]
    fn commands_route_through_the_reservation() {
        let sim = simulator();
        let handle = handle_for(&sim, "10.0.0.1");
        let output = handle.run_custom_command("show version").unwrap();
        assert!(output.contains("show version"));

        let file_name = handle.save("ftp://10.0.0.5/configs", "running").unwrap();
        assert!(file_name.starts_with("r1-running"));
        handle
            .restore(&format!("ftp://10.0.0.5/configs/{file_name}"), "running", "append")
            .unwrap();

        let err = handle.orchestration_save("shallow", "").unwrap_err();
        assert!(err.to_string().contains("not defined"));
    }
}

//! In-process CloudShell simulator.
//!
//! Seeded from the `[simulator]` config section. Devices whose address is a
//! placeholder behave like unreachable hardware: every device-facing call
//! fails with the same `SessionManagerException ... 'ConnectionError'` text a
//! real CloudShell returns. Saves land in the configured [`FileStore`].

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::core::config::{SimulatedShellConfig, SimulatorConfig};
use crate::core::errors::{Result, ShtError};
use crate::platform::api::{
    ApiError, ApiResult, AttributeValue, CloudShellApi, CommandParams, ReservationDetails,
    ReservationStatus, ResourceInfo, ServiceModelInfo, TargetType,
};
use crate::platform::{ApiConnector, HostCheck};
use crate::transport::{FileStore, file_name_of};

/// Model of the device-under-test resource used by connectivity checks.
pub const DUT_MODEL: &str = "Shell Tests DUT";
/// Address given to DUT resources; reachable in the simulator.
pub const DUT_ADDRESS: &str = "192.0.2.1";

const DUT_FAMILY: &str = "CS_Switch";

/// `true` when an address stands for "no device".
#[must_use]
pub fn is_placeholder_address(address: &str) -> bool {
    let address = address.trim();
    address.is_empty() || address == "127.0.0.1" || address == "localhost"
}

fn connection_error(target: &str) -> ApiError {
    ApiError::new(
        "100",
        format!("SessionManagerException: Failed to open session to {target}: 'ConnectionError'"),
    )
}

fn not_found(kind: &str, name: &str) -> ApiError {
    ApiError::new("100", format!("{kind} '{name}' not found"))
}

#[derive(Debug, Clone)]
struct SimResource {
    info: ResourceInfo,
    commands: Vec<String>,
    /// Deployed from a topology app; removed when its reservation ends.
    deployed_in: Option<String>,
}

#[derive(Debug, Clone)]
struct SimService {
    name: String,
    model: String,
    commands: Vec<String>,
    attributes: BTreeMap<String, String>,
}

impl SimService {
    fn is_reachable(&self) -> bool {
        self.attributes
            .iter()
            .any(|(name, value)| name.ends_with("Address") && !is_placeholder_address(value))
    }
}

#[derive(Debug, Clone)]
struct SimReservation {
    name: String,
    status: String,
    provisioning_status: String,
    pending_polls: u32,
    resources: Vec<String>,
    services: Vec<SimService>,
    errors: Vec<String>,
    connections: Vec<(String, String)>,
    connectors: Vec<(String, String, String)>,
}

#[derive(Debug, Default)]
struct SimState {
    installed: BTreeMap<String, SimulatedShellConfig>,
    resources: BTreeMap<String, SimResource>,
    reservations: BTreeMap<String, SimReservation>,
    faults: HashMap<String, VecDeque<ApiError>>,
    journal: Vec<String>,
    sequence: u64,
}

impl SimState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}-{:04}", self.sequence)
    }

    fn unique_resource_name(&self, requested: &str) -> String {
        if !self.resources.contains_key(requested) {
            return requested.to_string();
        }
        (1..)
            .map(|n| format!("{requested}_{n}"))
            .find(|candidate| !self.resources.contains_key(candidate))
            .unwrap_or_else(|| requested.to_string())
    }

    fn reservation_mut(&mut self, reservation_id: &str) -> ApiResult<&mut SimReservation> {
        self.reservations
            .get_mut(reservation_id)
            .ok_or_else(|| not_found("Reservation", reservation_id))
    }

    /// Resolve a full resource path (`r1/Chassis 1/Port 1`) to its node.
    fn node_mut(&mut self, full_name: &str) -> Option<&mut ResourceInfo> {
        let root = full_name.split('/').next()?;
        let resource = self.resources.get_mut(root)?;
        find_node_mut(&mut resource.info, full_name)
    }

    fn node(&self, full_name: &str) -> Option<&ResourceInfo> {
        let root = full_name.split('/').next()?;
        let resource = self.resources.get(root)?;
        find_node(&resource.info, full_name)
    }
}

fn find_node_mut<'a>(info: &'a mut ResourceInfo, full_name: &str) -> Option<&'a mut ResourceInfo> {
    if info.name == full_name {
        return Some(info);
    }
    info.children
        .iter_mut()
        .find_map(|child| find_node_mut(child, full_name))
}

fn find_node<'a>(info: &'a ResourceInfo, full_name: &str) -> Option<&'a ResourceInfo> {
    if info.name == full_name {
        return Some(info);
    }
    info.children
        .iter()
        .find_map(|child| find_node(child, full_name))
}

fn leaf(name: String, family: &str, model: &str, address: &str) -> ResourceInfo {
    ResourceInfo {
        name,
        family: family.to_string(),
        model: model.to_string(),
        address: address.to_string(),
        attributes: Vec::new(),
        children: Vec::new(),
    }
}

/// Child tree discovered by autoload for a resource family.
fn autoload_children(parent: &str, family: &str) -> Vec<ResourceInfo> {
    match family {
        "CS_Router" | "CS_Switch" | "CS_Firewall" => {
            let chassis_name = format!("{parent}/Chassis 1");
            let mut chassis = leaf(chassis_name.clone(), "CS_Chassis", "Generic Chassis", "1");
            chassis.children = (1..=4)
                .map(|n| {
                    leaf(
                        format!("{chassis_name}/Port {n}"),
                        "CS_Port",
                        "Generic Port",
                        &format!("1/{n}"),
                    )
                })
                .collect();
            vec![chassis]
        }
        "CS_TrafficGeneratorChassis" => {
            let module_name = format!("{parent}/Module 1");
            let mut module = leaf(
                module_name.clone(),
                "CS_TrafficGeneratorModule",
                "Generic Traffic Generator Module",
                "1",
            );
            module.children = (1..=2)
                .map(|n| {
                    leaf(
                        format!("{module_name}/Port {n}"),
                        "CS_TrafficGeneratorPort",
                        "Generic Traffic Generator Port",
                        &format!("1/{n}"),
                    )
                })
                .collect();
            vec![module]
        }
        _ => Vec::new(),
    }
}

/// Ports a virtual chassis carries from the moment it is deployed.
fn virtual_ports(parent: &str) -> Vec<ResourceInfo> {
    (1..=2)
        .map(|n| {
            leaf(
                format!("{parent}/Port {n}"),
                "CS_VirtualTrafficGeneratorPort",
                "Virtual Traffic Generator Port",
                &n.to_string(),
            )
        })
        .collect()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn require<'a>(params: &'a CommandParams, key: &str, command: &str) -> ApiResult<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            ApiError::new(
                "100",
                format!("Missing required parameter '{key}' for command '{command}'"),
            )
        })
}

/// Called with `(operation, detail)` before a device-facing call takes the state lock.
pub type CallHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Thread-safe in-memory CloudShell.
pub struct SimulatedCloudShell {
    host: String,
    config: SimulatorConfig,
    store: Arc<dyn FileStore>,
    alive: bool,
    setup_polls: u32,
    state: Mutex<SimState>,
    hook: Mutex<Option<CallHook>>,
}

impl std::fmt::Debug for SimulatedCloudShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedCloudShell")
            .field("host", &self.host)
            .field("alive", &self.alive)
            .finish_non_exhaustive()
    }
}

impl SimulatedCloudShell {
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        config: SimulatorConfig,
        store: Arc<dyn FileStore>,
    ) -> Self {
        let mut state = SimState::default();
        state.installed.insert(
            DUT_MODEL.to_string(),
            SimulatedShellConfig {
                path: String::new(),
                model: DUT_MODEL.to_string(),
                family: DUT_FAMILY.to_string(),
                commands: vec!["applyconnectivitychanges".to_string()],
                service: false,
            },
        );
        Self {
            host: host.into(),
            config,
            store,
            alive: true,
            setup_polls: 0,
            state: Mutex::new(state),
            hook: Mutex::new(None),
        }
    }

    /// An instance whose liveness check fails.
    #[must_use]
    pub fn dead(mut self) -> Self {
        self.alive = false;
        self
    }

    /// Status polls answered with `Setup` before a reservation reports `Ready`.
    #[must_use]
    pub const fn with_setup_polls(mut self, polls: u32) -> Self {
        self.setup_polls = polls;
        self
    }

    /// Observe (or stall) autoload and command execution. Replaces any earlier hook.
    pub fn on_device_call(&self, hook: impl Fn(&str, &str) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    fn call_hook(&self, operation: &str, detail: &str) {
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(operation, detail);
        }
    }

    /// Make the next call to `operation` fail with `error`. Faults queue up per operation.
    pub fn fail_next(&self, operation: &str, error: ApiError) {
        self.state
            .lock()
            .faults
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Every call made so far, as `operation detail`.
    #[must_use]
    pub fn journal(&self) -> Vec<String> {
        self.state.lock().journal.clone()
    }

    #[must_use]
    pub fn calls(&self, operation: &str) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|entry| entry.split(' ').next() == Some(operation))
            .count()
    }

    /// Ids of reservations that are neither ended nor deleted.
    #[must_use]
    pub fn active_reservations(&self) -> Vec<String> {
        self.state
            .lock()
            .reservations
            .iter()
            .filter(|(_, reservation)| reservation.status != "Completed")
            .map(|(id, _)| id.clone())
            .collect()
    }

    #[must_use]
    pub fn resource_names(&self) -> Vec<String> {
        self.state.lock().resources.keys().cloned().collect()
    }

    fn enter(&self, state: &mut SimState, operation: &str, detail: &str) -> ApiResult<()> {
        state.journal.push(format!("{operation} {detail}"));
        if let Some(error) = state
            .faults
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        Ok(())
    }

    fn run_device_command(
        &self,
        target: &str,
        command: &str,
        params: &CommandParams,
        state: &mut SimState,
    ) -> ApiResult<String> {
        match command {
            "run_custom_command" | "run_custom_config_command" => {
                let text = require(params, "custom_command", command)?;
                Ok(format!("{target}#{text}\nSimulated output for '{text}'"))
            }
            "save" => {
                let folder = require(params, "folder_path", command)?;
                let configuration_type = params
                    .get("configuration_type")
                    .map_or("running", String::as_str);
                let store_url = self.store.url();
                if folder.trim_end_matches('/') != store_url.trim_end_matches('/') {
                    return Err(ApiError::new(
                        "100",
                        format!("Failed to upload configuration to {folder}"),
                    ));
                }
                state.sequence += 1;
                let file_name = format!(
                    "{}-{configuration_type}-{:04}",
                    sanitize(target),
                    state.sequence
                );
                let contents = format!("! {configuration_type} configuration\nhostname {target}\n");
                self.store
                    .put_file(&file_name, contents.as_bytes())
                    .map_err(|err| ApiError::new("100", err.to_string()))?;
                Ok(file_name)
            }
            "orchestration_save" => {
                let mode = params.get("mode").map_or("shallow", String::as_str);
                state.sequence += 1;
                let artifact = serde_json::json!({
                    "saved_artifacts_info": {
                        "resource_name": target,
                        "created_date": format!("seq-{:04}", state.sequence),
                        "restore_rules": {"requires_same_resource": true},
                        "saved_artifact": {
                            "artifact_type": "simulated",
                            "identifier": format!("{}-{mode}", sanitize(target)),
                        },
                    }
                });
                Ok(artifact.to_string())
            }
            "restore" => {
                let path = require(params, "path", command)?;
                let name = file_name_of(path);
                self.store.get_file(name).map_err(|_| {
                    ApiError::new("100", format!("Configuration file {name} not found"))
                })?;
                Ok(format!("Configuration restored from {name}"))
            }
            "orchestration_restore" => {
                let info = require(params, "saved_artifact_info", command)?;
                serde_json::from_str::<serde_json::Value>(info).map_err(|err| {
                    ApiError::new("100", format!("Invalid saved artifact info: {err}"))
                })?;
                Ok("Orchestration restore completed".to_string())
            }
            "health_check" => Ok(format!("Health check on resource {target} passed")),
            "load_config" => {
                let location = require(params, "config_file_location", command)?;
                Ok(format!("Configuration {location} loaded"))
            }
            "start_traffic" => Ok("Traffic started".to_string()),
            "stop_traffic" => Ok("Traffic stopped".to_string()),
            "get_statistics" => Ok(serde_json::json!({
                "Port 1": {"tx_frames": 1000, "rx_frames": 1000},
                "Port 2": {"tx_frames": 1000, "rx_frames": 1000},
            })
            .to_string()),
            "get_test_file" => {
                let test_name = require(params, "test_name", command)?;
                Ok(format!("{}/{test_name}.tst", self.store.url().trim_end_matches('/')))
            }
            other => Ok(format!("{other} completed")),
        }
    }
}

impl CloudShellApi for SimulatedCloudShell {
    fn host(&self) -> &str {
        &self.host
    }

    fn is_alive(&self) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "is_alive", &self.host)?;
        if self.alive {
            Ok(())
        } else {
            Err(connection_error(&self.host))
        }
    }

    fn install_shell(&self, shell_path: &str) -> ApiResult<String> {
        let mut state = self.state.lock();
        self.enter(&mut state, "install_shell", shell_path)?;
        let shell = self
            .config
            .shells
            .iter()
            .find(|shell| shell.path == shell_path)
            .cloned()
            .ok_or_else(|| not_found("Shell package", shell_path))?;
        let model = shell.model.clone();
        state.installed.insert(model.clone(), shell);
        Ok(model)
    }

    fn create_reservation(&self, name: &str, _duration_minutes: u32) -> ApiResult<String> {
        let mut state = self.state.lock();
        self.enter(&mut state, "create_reservation", name)?;
        let id = state.next_id("res");
        state.reservations.insert(
            id.clone(),
            SimReservation {
                name: name.to_string(),
                status: "Started".to_string(),
                provisioning_status: "Setup".to_string(),
                pending_polls: self.setup_polls,
                resources: Vec::new(),
                services: Vec::new(),
                errors: Vec::new(),
                connections: Vec::new(),
                connectors: Vec::new(),
            },
        );
        Ok(id)
    }

    fn create_topology_reservation(
        &self,
        name: &str,
        topology: &str,
        _duration_minutes: u32,
        _specific_version: Option<&str>,
    ) -> ApiResult<String> {
        let mut state = self.state.lock();
        self.enter(&mut state, "create_topology_reservation", topology)?;
        let blueprint = self
            .config
            .topologies
            .iter()
            .find(|t| t.name == topology || t.name.rsplit('/').next() == Some(topology))
            .cloned()
            .ok_or_else(|| not_found("Topology", topology))?;

        let id = state.next_id("res");
        let mut members = Vec::new();
        for app in &blueprint.apps {
            let resource_name = state.unique_resource_name(&app.name);
            let mut info = leaf(resource_name.clone(), &app.family, &app.model, &app.address);
            if app.family == "CS_VirtualTrafficGeneratorChassis" {
                info.children = virtual_ports(&resource_name);
            }
            state.resources.insert(
                resource_name.clone(),
                SimResource {
                    info,
                    commands: app.commands.clone(),
                    deployed_in: Some(id.clone()),
                },
            );
            members.push(resource_name);
        }

        state.reservations.insert(
            id.clone(),
            SimReservation {
                name: name.to_string(),
                status: "Started".to_string(),
                provisioning_status: "Setup".to_string(),
                pending_polls: self.setup_polls,
                resources: members,
                services: Vec::new(),
                errors: Vec::new(),
                connections: Vec::new(),
                connectors: Vec::new(),
            },
        );
        Ok(id)
    }

    fn get_reservation_status(&self, reservation_id: &str) -> ApiResult<ReservationStatus> {
        let mut state = self.state.lock();
        self.enter(&mut state, "get_reservation_status", reservation_id)?;
        let reservation = state.reservation_mut(reservation_id)?;
        if reservation.provisioning_status == "Setup" {
            if reservation.pending_polls == 0 {
                reservation.provisioning_status = "Ready".to_string();
            } else {
                reservation.pending_polls -= 1;
            }
        }
        Ok(ReservationStatus {
            status: reservation.status.clone(),
            provisioning_status: reservation.provisioning_status.clone(),
        })
    }

    fn get_reservation_details(&self, reservation_id: &str) -> ApiResult<ReservationDetails> {
        let mut state = self.state.lock();
        self.enter(&mut state, "get_reservation_details", reservation_id)?;
        let reservation = state.reservation_mut(reservation_id)?;
        Ok(ReservationDetails {
            id: reservation_id.to_string(),
            name: reservation.name.clone(),
            resources: reservation.resources.clone(),
            services: reservation.services.iter().map(|s| s.name.clone()).collect(),
            errors: reservation.errors.clone(),
        })
    }

    fn end_reservation(&self, reservation_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "end_reservation", reservation_id)?;
        let reservation = state.reservation_mut(reservation_id)?;
        reservation.status = "Completed".to_string();
        reservation.connectors.clear();
        reservation.connections.clear();
        state
            .resources
            .retain(|_, resource| resource.deployed_in.as_deref() != Some(reservation_id));
        Ok(())
    }

    fn delete_reservation(&self, reservation_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "delete_reservation", reservation_id)?;
        state
            .reservations
            .remove(reservation_id)
            .map(|_| ())
            .ok_or_else(|| not_found("Reservation", reservation_id))?;
        state
            .resources
            .retain(|_, resource| resource.deployed_in.as_deref() != Some(reservation_id));
        Ok(())
    }

    fn get_topologies_by_category(&self, category: &str) -> ApiResult<Vec<String>> {
        let mut state = self.state.lock();
        self.enter(&mut state, "get_topologies_by_category", category)?;
        Ok(self
            .config
            .topologies
            .iter()
            .filter(|t| category.is_empty() || t.category == category)
            .map(|t| t.name.clone())
            .collect())
    }

    fn create_resource(&self, name: &str, model: &str, address: &str) -> ApiResult<String> {
        let mut state = self.state.lock();
        self.enter(&mut state, "create_resource", name)?;
        let shell = state
            .installed
            .get(model)
            .filter(|shell| !shell.service)
            .cloned()
            .ok_or_else(|| not_found("Resource model", model))?;
        let final_name = state.unique_resource_name(name);
        let mut info = leaf(final_name.clone(), &shell.family, model, address);
        if shell.family == "CS_VirtualTrafficGeneratorChassis" {
            info.children = virtual_ports(&final_name);
        }
        state.resources.insert(
            final_name.clone(),
            SimResource {
                info,
                commands: shell.commands,
                deployed_in: None,
            },
        );
        Ok(final_name)
    }

    fn rename_resource(&self, current_name: &str, new_name: &str) -> ApiResult<String> {
        let mut state = self.state.lock();
        self.enter(&mut state, "rename_resource", current_name)?;
        let mut resource = state
            .resources
            .remove(current_name)
            .ok_or_else(|| not_found("Resource", current_name))?;
        let final_name = state.unique_resource_name(new_name);
        rename_tree(&mut resource.info, current_name, &final_name);
        state.resources.insert(final_name.clone(), resource);
        for reservation in state.reservations.values_mut() {
            for member in &mut reservation.resources {
                if member == current_name {
                    member.clone_from(&final_name);
                }
            }
        }
        Ok(final_name)
    }

    fn delete_resource(&self, name: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "delete_resource", name)?;
        state
            .resources
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("Resource", name))?;
        for reservation in state.reservations.values_mut() {
            reservation.resources.retain(|member| member != name);
        }
        Ok(())
    }

    fn set_resource_attributes(
        &self,
        name: &str,
        namespace: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "set_resource_attributes", name)?;
        let node = state.node_mut(name).ok_or_else(|| not_found("Resource", name))?;
        for (key, value) in attributes {
            let full_name = if namespace.is_empty() {
                key.clone()
            } else {
                format!("{namespace}.{key}")
            };
            match node.attributes.iter_mut().find(|attr| attr.name == full_name) {
                Some(existing) => existing.value.clone_from(value),
                None => node.attributes.push(AttributeValue {
                    name: full_name,
                    value: value.clone(),
                }),
            }
        }
        Ok(())
    }

    fn resource_autoload(&self, name: &str) -> ApiResult<()> {
        self.call_hook("resource_autoload", name);
        let mut state = self.state.lock();
        self.enter(&mut state, "resource_autoload", name)?;
        let resource = state
            .resources
            .get_mut(name)
            .ok_or_else(|| not_found("Resource", name))?;
        if is_placeholder_address(&resource.info.address) {
            return Err(connection_error(&resource.info.address));
        }
        if resource.info.family != "CS_VirtualTrafficGeneratorChassis" {
            resource.info.children = autoload_children(name, &resource.info.family);
        }
        Ok(())
    }

    fn update_driver_for_resource(&self, name: &str, driver: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "update_driver_for_resource", &format!("{name} {driver}"))?;
        if state.resources.contains_key(name) {
            Ok(())
        } else {
            Err(not_found("Resource", name))
        }
    }

    fn get_resource_details(&self, name: &str) -> ApiResult<ResourceInfo> {
        let mut state = self.state.lock();
        self.enter(&mut state, "get_resource_details", name)?;
        state
            .node(name)
            .cloned()
            .ok_or_else(|| not_found("Resource", name))
    }

    fn get_resource_commands(&self, name: &str) -> ApiResult<Vec<String>> {
        let mut state = self.state.lock();
        self.enter(&mut state, "get_resource_commands", name)?;
        state
            .resources
            .get(name)
            .map(|resource| resource.commands.clone())
            .ok_or_else(|| not_found("Resource", name))
    }

    fn get_service_model(&self, model: &str) -> ApiResult<ServiceModelInfo> {
        let mut state = self.state.lock();
        self.enter(&mut state, "get_service_model", model)?;
        state
            .installed
            .get(model)
            .filter(|shell| shell.service)
            .map(|shell| ServiceModelInfo {
                model: shell.model.clone(),
                family: shell.family.clone(),
                commands: shell.commands.clone(),
            })
            .ok_or_else(|| not_found("Service model", model))
    }

    fn add_resource_to_reservation(&self, reservation_id: &str, name: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "add_resource_to_reservation", name)?;
        if !state.resources.contains_key(name) {
            return Err(not_found("Resource", name));
        }
        let reservation = state.reservation_mut(reservation_id)?;
        if !reservation.resources.iter().any(|member| member == name) {
            reservation.resources.push(name.to_string());
        }
        Ok(())
    }

    fn add_service_to_reservation(
        &self,
        reservation_id: &str,
        model: &str,
        name: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "add_service_to_reservation", name)?;
        let shell = state
            .installed
            .get(model)
            .filter(|shell| shell.service)
            .cloned()
            .ok_or_else(|| not_found("Service model", model))?;
        let reservation = state.reservation_mut(reservation_id)?;
        if reservation.services.iter().any(|service| service.name == name) {
            return Err(ApiError::new(
                "100",
                format!("Service '{name}' already exists in reservation"),
            ));
        }
        reservation.services.push(SimService {
            name: name.to_string(),
            model: model.to_string(),
            commands: shell.commands,
            attributes: attributes.clone(),
        });
        Ok(())
    }

    fn execute_command(
        &self,
        reservation_id: &str,
        target: &str,
        target_type: TargetType,
        command: &str,
        params: &CommandParams,
    ) -> ApiResult<String> {
        let detail = format!("{target} {command}");
        self.call_hook("execute_command", &detail);
        let mut state = self.state.lock();
        self.enter(&mut state, "execute_command", &detail)?;
        let reservation = state
            .reservations
            .get(reservation_id)
            .ok_or_else(|| not_found("Reservation", reservation_id))?;

        let (commands, reachable, address) = match target_type {
            TargetType::Resource => {
                if !reservation.resources.iter().any(|member| member == target) {
                    return Err(ApiError::new(
                        "100",
                        format!("Resource '{target}' is not in reservation {reservation_id}"),
                    ));
                }
                let resource = state
                    .resources
                    .get(target)
                    .ok_or_else(|| not_found("Resource", target))?;
                (
                    resource.commands.clone(),
                    !is_placeholder_address(&resource.info.address),
                    resource.info.address.clone(),
                )
            }
            TargetType::Service => {
                let service = reservation
                    .services
                    .iter()
                    .find(|service| service.name == target)
                    .ok_or_else(|| not_found("Service", target))?;
                (service.commands.clone(), service.is_reachable(), service.model.clone())
            }
        };

        if !commands.iter().any(|c| c.eq_ignore_ascii_case(command)) {
            return Err(ApiError::new(
                "100",
                format!("Command '{command}' is not defined for {target_type} '{target}'"),
            ));
        }
        if !reachable {
            return Err(connection_error(&address));
        }
        self.run_device_command(target, &command.to_lowercase(), params, &mut state)
    }

    fn add_physical_connection(
        &self,
        reservation_id: &str,
        port1: &str,
        port2: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "add_physical_connection", &format!("{port1} {port2}"))?;
        for port in [port1, port2] {
            if state.node(port).is_none() {
                return Err(not_found("Port", port));
            }
        }
        let reservation = state.reservation_mut(reservation_id)?;
        reservation
            .connections
            .push((port1.to_string(), port2.to_string()));
        Ok(())
    }

    fn connect_ports_with_connector(
        &self,
        reservation_id: &str,
        port1: &str,
        port2: &str,
        connector_name: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "connect_ports_with_connector", connector_name)?;
        for port in [port1, port2] {
            if state.node(port).is_none() {
                return Err(not_found("Port", port));
            }
        }
        let reservation = state.reservation_mut(reservation_id)?;
        reservation.connectors.push((
            port1.to_string(),
            port2.to_string(),
            connector_name.to_string(),
        ));
        Ok(())
    }

    fn remove_connector(&self, reservation_id: &str, port1: &str, port2: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        self.enter(&mut state, "remove_connector", &format!("{port1} {port2}"))?;
        let reservation = state.reservation_mut(reservation_id)?;
        let before = reservation.connectors.len();
        reservation
            .connectors
            .retain(|(a, b, _)| !(a == port1 && b == port2));
        if reservation.connectors.len() == before {
            return Err(not_found("Connector", &format!("{port1} <-> {port2}")));
        }
        Ok(())
    }
}

fn rename_tree(info: &mut ResourceInfo, old_root: &str, new_root: &str) {
    if let Some(rest) = info.name.strip_prefix(old_root) {
        info.name = format!("{new_root}{rest}");
    }
    for child in &mut info.children {
        rename_tree(child, old_root, new_root);
    }
}

// ──────────────────── connector ────────────────────

/// Hands out simulated CloudShell instances by host.
///
/// The first `failed_deployments` freshly deployed instances come up dead,
/// which exercises the provisioning retry path end to end.
pub struct SimulatedConnector {
    config: SimulatorConfig,
    store: Arc<dyn FileStore>,
    deployments: AtomicU32,
    instances: Mutex<HashMap<String, Arc<SimulatedCloudShell>>>,
}

impl SimulatedConnector {
    #[must_use]
    pub fn new(config: SimulatorConfig, store: Arc<dyn FileStore>) -> Self {
        Self {
            config,
            store,
            deployments: AtomicU32::new(0),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The instance serving `host`, creating it on first use.
    #[must_use]
    pub fn instance(&self, host: &str) -> Arc<SimulatedCloudShell> {
        Arc::clone(self.instances.lock().entry(host.to_string()).or_insert_with(|| {
            Arc::new(SimulatedCloudShell::new(
                host,
                self.config.clone(),
                Arc::clone(&self.store),
            ))
        }))
    }
}

impl ApiConnector for SimulatedConnector {
    fn connect(
        &self,
        host: &str,
        _user: &str,
        _password: &str,
        _domain: &str,
    ) -> Result<Arc<dyn CloudShellApi>> {
        Ok(self.instance(host))
    }

    fn connect_deployed(
        &self,
        host: &str,
        _user: &str,
        _password: &str,
        _domain: &str,
    ) -> Result<Arc<dyn CloudShellApi>> {
        if host.trim().is_empty() {
            return Err(ShtError::CloudShellUnreachable {
                host: host.to_string(),
                details: "deployed CloudShell has no address".to_string(),
            });
        }
        let deployment = self.deployments.fetch_add(1, Ordering::SeqCst) + 1;
        let mut instance =
            SimulatedCloudShell::new(host, self.config.clone(), Arc::clone(&self.store));
        if deployment <= self.config.failed_deployments {
            instance = instance.dead();
        }
        let instance = Arc::new(instance);
        self.instances
            .lock()
            .insert(host.to_string(), Arc::clone(&instance));
        Ok(instance)
    }
}

impl HostCheck for SimulatedConnector {
    fn is_host_alive(&self, host: &str) -> bool {
        !self.config.unreachable_hosts.iter().any(|h| h == host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{SimulatedAppConfig, SimulatedTopologyConfig};
    use crate::transport::MemoryStore;

    const STORE_URL: &str = "ftp://10.0.0.5/configs";

    fn shell(
        path: &str,
        model: &str,
        family: &str,
        commands: &[&str],
        service: bool,
    ) -> SimulatedShellConfig {
        SimulatedShellConfig {
            path: path.to_string(),
            model: model.to_string(),
            family: family.to_string(),
            commands: commands.iter().map(|c| (*c).to_string()).collect(),
            service,
        }
    }

    fn simulator() -> (SimulatedCloudShell, Arc<MemoryStore>) {
        let config = SimulatorConfig {
            shells: vec![
                shell(
                    "cisco_ios.zip",
                    "Cisco IOS Router 2G",
                    "CS_Router",
                    &["run_custom_command", "save", "restore", "orchestration_save"],
                    false,
                ),
                shell(
                    "ixia_controller.zip",
                    "Ixia Controller",
                    "CS_TrafficGeneratorController",
                    &["load_config", "start_traffic"],
                    true,
                ),
            ],
            topologies: vec![SimulatedTopologyConfig {
                name: "Environments/CloudShell 9.3".to_string(),
                category: "CloudShell".to_string(),
                apps: vec![SimulatedAppConfig {
                    name: "CloudShell".to_string(),
                    model: "Generic App Model".to_string(),
                    family: "CS_GenericAppFamily".to_string(),
                    address: "10.1.1.1".to_string(),
                    commands: Vec::new(),
                }],
            }],
            failed_deployments: 0,
            unreachable_hosts: Vec::new(),
        };
        let store = Arc::new(MemoryStore::new(STORE_URL));
        let sim = SimulatedCloudShell::new("cs.local", config, store.clone());
        (sim, store)
    }

    fn ready_reservation(sim: &SimulatedCloudShell) -> String {
        let id = sim.create_reservation("sandbox", 60).unwrap();
        assert!(sim.get_reservation_status(&id).unwrap().is_ready());
        id
    }

    #[test]
    fn create_resource_requires_installed_model() {
        let (sim, _) = simulator();
        assert!(sim.create_resource("r1", "Cisco IOS Router 2G", "10.0.0.1").is_err());
        assert_eq!(sim.install_shell("cisco_ios.zip").unwrap(), "Cisco IOS Router 2G");
        assert_eq!(
            sim.create_resource("r1", "Cisco IOS Router 2G", "10.0.0.1").unwrap(),
            "r1"
        );
        assert_eq!(
            sim.create_resource("r1", "Cisco IOS Router 2G", "10.0.0.2").unwrap(),
            "r1_1"
        );
    }

    #[test]
    fn autoload_builds_port_tree_for_reachable_devices() {
        let (sim, _) = simulator();
        sim.install_shell("cisco_ios.zip").unwrap();
        sim.create_resource("r1", "Cisco IOS Router 2G", "10.0.0.1").unwrap();
        sim.resource_autoload("r1").unwrap();
        let info = sim.get_resource_details("r1").unwrap();
        assert!(info.structure().contains("CS_Port"));
        let child = sim.get_resource_details("r1/Chassis 1/Port 2").unwrap();
        assert_eq!(child.family, "CS_Port");
    }

    #[test]
    fn placeholder_address_raises_connection_error() {
        let (sim, _) = simulator();
        sim.install_shell("cisco_ios.zip").unwrap();
        sim.create_resource("r1", "Cisco IOS Router 2G", "127.0.0.1").unwrap();
        let err = sim.resource_autoload("r1").unwrap_err();
        assert!(err.message.contains("SessionManagerException"));
        assert!(err.message.contains("'ConnectionError'"));
    }

    #[test]
    fn save_writes_into_store_and_restore_reads_it() {
        let (sim, store) = simulator();
        sim.install_shell("cisco_ios.zip").unwrap();
        sim.create_resource("r1", "Cisco IOS Router 2G", "10.0.0.1").unwrap();
        let id = ready_reservation(&sim);
        sim.add_resource_to_reservation(&id, "r1").unwrap();

        let params: CommandParams = [
            ("folder_path".to_string(), STORE_URL.to_string()),
            ("configuration_type".to_string(), "running".to_string()),
        ]
        .into();
        let file = sim
            .execute_command(&id, "r1", TargetType::Resource, "save", &params)
            .unwrap();
        assert!(store.get_file(&file).is_ok());

        let restore: CommandParams =
            [("path".to_string(), format!("{STORE_URL}/{file}"))].into();
        sim.execute_command(&id, "r1", TargetType::Resource, "restore", &restore)
            .unwrap();

        store.delete_file(&file).unwrap();
        assert!(
            sim.execute_command(&id, "r1", TargetType::Resource, "restore", &restore)
                .is_err()
        );
    }

    #[test]
    fn unknown_command_rejected() {
        let (sim, _) = simulator();
        sim.install_shell("cisco_ios.zip").unwrap();
        sim.create_resource("r1", "Cisco IOS Router 2G", "10.0.0.1").unwrap();
        let id = ready_reservation(&sim);
        sim.add_resource_to_reservation(&id, "r1").unwrap();
        let err = sim
            .execute_command(&id, "r1", TargetType::Resource, "load_config", &CommandParams::new())
            .unwrap_err();
        assert!(err.message.contains("not defined"));
    }

    #[test]
    fn services_without_address_are_unreachable() {
        let (sim, _) = simulator();
        sim.install_shell("ixia_controller.zip").unwrap();
        let id = ready_reservation(&sim);
        sim.add_service_to_reservation(&id, "Ixia Controller", "ctrl", &BTreeMap::new())
            .unwrap();
        let no_params = CommandParams::new();
        let err = sim
            .execute_command(&id, "ctrl", TargetType::Service, "start_traffic", &no_params)
            .unwrap_err();
        assert!(err.message.contains("ConnectionError"));

        let attrs: BTreeMap<String, String> =
            [("Controller Address".to_string(), "10.0.0.9".to_string())].into();
        sim.add_service_to_reservation(&id, "Ixia Controller", "ctrl2", &attrs)
            .unwrap();
        assert_eq!(
            sim.execute_command(&id, "ctrl2", TargetType::Service, "start_traffic", &no_params)
                .unwrap(),
            "Traffic started"
        );
    }

    #[test]
    fn setup_polls_delay_readiness() {
        let (sim, _) = simulator();
        let sim = sim.with_setup_polls(2);
        let id = sim.create_reservation("sandbox", 60).unwrap();
        assert!(!sim.get_reservation_status(&id).unwrap().is_ready());
        assert!(!sim.get_reservation_status(&id).unwrap().is_ready());
        assert!(sim.get_reservation_status(&id).unwrap().is_ready());
    }

    #[test]
    fn fault_injection_is_consumed_once() {
        let (sim, _) = simulator();
        sim.fail_next("create_reservation", ApiError::new("500", "quota exceeded"));
        assert!(sim.create_reservation("a", 10).is_err());
        assert!(sim.create_reservation("b", 10).is_ok());
        assert_eq!(sim.calls("create_reservation"), 2);
    }

    #[test]
    fn topology_reservation_deploys_apps_and_cleans_up() {
        let (sim, _) = simulator();
        let topologies = sim.get_topologies_by_category("CloudShell").unwrap();
        assert_eq!(topologies, vec!["Environments/CloudShell 9.3".to_string()]);

        let id = sim
            .create_topology_reservation("do", "CloudShell 9.3", 60, None)
            .unwrap();
        let details = sim.get_reservation_details(&id).unwrap();
        assert_eq!(details.resources, vec!["CloudShell".to_string()]);
        assert_eq!(sim.get_resource_details("CloudShell").unwrap().address, "10.1.1.1");

        sim.end_reservation(&id).unwrap();
        assert!(sim.get_resource_details("CloudShell").is_err());
        assert!(sim.active_reservations().is_empty());
    }

    #[test]
    fn connectors_must_exist_to_be_removed() {
        let (sim, _) = simulator();
        sim.install_shell("cisco_ios.zip").unwrap();
        sim.create_resource("r1", "Cisco IOS Router 2G", "10.0.0.1").unwrap();
        sim.resource_autoload("r1").unwrap();
        let id = ready_reservation(&sim);
        let p1 = "r1/Chassis 1/Port 1";
        let p2 = "r1/Chassis 1/Port 2";
        assert!(sim.remove_connector(&id, p1, p2).is_err());
        sim.connect_ports_with_connector(&id, p1, p2, "dut-connector").unwrap();
        sim.remove_connector(&id, p1, p2).unwrap();
    }

    #[test]
    fn connector_marks_first_deployments_dead() {
        let (_, store) = simulator();
        let config = SimulatorConfig {
            failed_deployments: 2,
            ..SimulatorConfig::default()
        };
        let connector = SimulatedConnector::new(config, store);
        let first = connector.connect_deployed("10.1.1.1", "admin", "admin", "Global").unwrap();
        let second = connector.connect_deployed("10.1.1.2", "admin", "admin", "Global").unwrap();
        let third = connector.connect_deployed("10.1.1.3", "admin", "admin", "Global").unwrap();
        assert!(first.is_alive().is_err());
        assert!(second.is_alive().is_err());
        assert!(third.is_alive().is_ok());
    }

    #[test]
    fn connector_reports_configured_hosts_as_down() {
        let (_, store) = simulator();
        let config = SimulatorConfig {
            unreachable_hosts: vec!["10.0.0.9".to_string()],
            ..SimulatorConfig::default()
        };
        let connector = SimulatedConnector::new(config, store);
        assert!(!connector.is_host_alive("10.0.0.9"));
        assert!(connector.is_host_alive("10.0.0.1"));
    }
}

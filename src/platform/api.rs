//! CloudShell platform seam: the operations the harness needs from the
//! orchestration platform, and the data shapes it returns.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised by the platform itself (the remote side rejected a call).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("CloudShell API error {code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether the platform refused the call because no driver is bound to the resource.
    #[must_use]
    pub fn is_missing_driver(&self) -> bool {
        self.code == "129" || self.message == "no driver associated"
    }
}

/// Result of a single platform call.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Key/value parameters passed to a driver command.
pub type CommandParams = BTreeMap<String, String>;

/// What kind of reservation member a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Resource,
    Service,
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource => write!(f, "Resource"),
            Self::Service => write!(f, "Service"),
        }
    }
}

/// A named attribute value on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub name: String,
    pub value: String,
}

/// Resource details as reported by the platform, including the child tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub name: String,
    pub family: String,
    pub model: String,
    pub address: String,
    #[serde(default)]
    pub attributes: Vec<AttributeValue>,
    #[serde(default)]
    pub children: Vec<ResourceInfo>,
}

impl ResourceInfo {
    /// Attribute lookup; namespaced names (`Model.Attr`) match on the last segment.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name || attr.name.rsplit('.').next() == Some(name))
            .map(|attr| attr.value.as_str())
    }

    /// Nested family structure, e.g. `{CS_Router: [{CS_Chassis: [CS_Port, CS_Port]}]}`.
    #[must_use]
    pub fn structure(&self) -> String {
        if self.children.is_empty() {
            return self.family.clone();
        }
        let children: Vec<String> = self.children.iter().map(Self::structure).collect();
        format!("{{{}: [{}]}}", self.family, children.join(", "))
    }

    /// Depth-first search for a port not listed in `excluded`.
    #[must_use]
    pub fn find_port<'a>(&'a self, port_family: &str, excluded: &[&str]) -> Option<&'a str> {
        if self.family == port_family {
            return (!excluded.contains(&self.name.as_str())).then_some(self.name.as_str());
        }
        self.children
            .iter()
            .find_map(|child| child.find_port(port_family, excluded))
    }
}

/// Service model metadata: its family and the commands its driver exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceModelInfo {
    pub model: String,
    pub family: String,
    pub commands: Vec<String>,
}

/// Reservation lifecycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationStatus {
    /// `Started`, `Completed`, ...
    pub status: String,
    /// `Setup`, `Ready`, `Error`, ...
    pub provisioning_status: String,
}

impl ReservationStatus {
    /// Blueprints without a setup step report `Not Run` once they are started.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.provisioning_status == "Ready"
            || (self.provisioning_status == "Not Run" && self.status == "Started")
    }

    #[must_use]
    pub fn is_provisioning_error(&self) -> bool {
        self.provisioning_status == "Error"
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == "Completed"
    }
}

/// Reservation membership and the activity errors logged against it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDetails {
    pub id: String,
    pub name: String,
    pub resources: Vec<String>,
    pub services: Vec<String>,
    pub errors: Vec<String>,
}

/// Operations consumed from the orchestration platform.
///
/// Every call is synchronous and blocking; timeouts belong to the implementation.
pub trait CloudShellApi: Send + Sync {
    /// Host the client talks to, for diagnostics.
    fn host(&self) -> &str;
    /// Cheap liveness check used after provisioning a fresh instance.
    fn is_alive(&self) -> ApiResult<()>;

    fn install_shell(&self, shell_path: &str) -> ApiResult<String>;

    fn create_reservation(&self, name: &str, duration_minutes: u32) -> ApiResult<String>;
    fn create_topology_reservation(
        &self,
        name: &str,
        topology: &str,
        duration_minutes: u32,
        specific_version: Option<&str>,
    ) -> ApiResult<String>;
    fn get_reservation_status(&self, reservation_id: &str) -> ApiResult<ReservationStatus>;
    fn get_reservation_details(&self, reservation_id: &str) -> ApiResult<ReservationDetails>;
    fn end_reservation(&self, reservation_id: &str) -> ApiResult<()>;
    fn delete_reservation(&self, reservation_id: &str) -> ApiResult<()>;
    fn get_topologies_by_category(&self, category: &str) -> ApiResult<Vec<String>>;

    /// Create a resource; returns the final (possibly de-duplicated) name.
    fn create_resource(&self, name: &str, model: &str, address: &str) -> ApiResult<String>;
    fn rename_resource(&self, current_name: &str, new_name: &str) -> ApiResult<String>;
    fn delete_resource(&self, name: &str) -> ApiResult<()>;
    fn set_resource_attributes(
        &self,
        name: &str,
        namespace: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ApiResult<()>;
    fn resource_autoload(&self, name: &str) -> ApiResult<()>;
    fn update_driver_for_resource(&self, name: &str, driver: &str) -> ApiResult<()>;
    fn get_resource_details(&self, name: &str) -> ApiResult<ResourceInfo>;
    fn get_resource_commands(&self, name: &str) -> ApiResult<Vec<String>>;
    fn get_service_model(&self, model: &str) -> ApiResult<ServiceModelInfo>;

    fn add_resource_to_reservation(&self, reservation_id: &str, name: &str) -> ApiResult<()>;
    fn add_service_to_reservation(
        &self,
        reservation_id: &str,
        model: &str,
        name: &str,
        attributes: &BTreeMap<String, String>,
    ) -> ApiResult<()>;

    fn execute_command(
        &self,
        reservation_id: &str,
        target: &str,
        target_type: TargetType,
        command: &str,
        params: &CommandParams,
    ) -> ApiResult<String>;

    fn add_physical_connection(&self, reservation_id: &str, port1: &str, port2: &str)
    -> ApiResult<()>;
    fn connect_ports_with_connector(
        &self,
        reservation_id: &str,
        port1: &str,
        port2: &str,
        connector_name: &str,
    ) -> ApiResult<()>;
    fn remove_connector(&self, reservation_id: &str, port1: &str, port2: &str) -> ApiResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str) -> ResourceInfo {
        ResourceInfo {
            name: name.to_string(),
            family: "CS_Port".to_string(),
            model: "Generic Port".to_string(),
            address: String::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    fn router() -> ResourceInfo {
        ResourceInfo {
            name: "r1".to_string(),
            family: "CS_Router".to_string(),
            model: "Cisco IOS Router".to_string(),
            address: "10.0.0.1".to_string(),
            attributes: vec![AttributeValue {
                name: "Cisco IOS Router.User".to_string(),
                value: "admin".to_string(),
            }],
            children: vec![ResourceInfo {
                name: "r1/Chassis 1".to_string(),
                family: "CS_Chassis".to_string(),
                model: "Generic Chassis".to_string(),
                address: "1".to_string(),
                attributes: Vec::new(),
                children: vec![port("r1/Chassis 1/Gi0-1"), port("r1/Chassis 1/Gi0-2")],
            }],
        }
    }

    #[test]
    fn structure_renders_nested_families() {
        let structure = router().structure();
        assert_eq!(
            structure,
            "{CS_Router: [{CS_Chassis: [CS_Port, CS_Port]}]}"
        );
        assert!(structure.contains("CS_Port"));
    }

    #[test]
    fn find_port_skips_excluded() {
        let info = router();
        let first = info.find_port("CS_Port", &[]).expect("first port");
        let second = info.find_port("CS_Port", &[first]).expect("second port");
        assert_ne!(first, second);
        assert!(info.find_port("CS_Port", &[first, second]).is_none());
    }

    #[test]
    fn attribute_matches_namespaced_names() {
        assert_eq!(router().attribute("User"), Some("admin"));
        assert_eq!(router().attribute("Password"), None);
    }

    #[test]
    fn missing_driver_detection() {
        assert!(ApiError::new("129", "whatever").is_missing_driver());
        assert!(ApiError::new("100", "no driver associated").is_missing_driver());
        assert!(!ApiError::new("100", "SessionManagerException").is_missing_driver());
    }

    #[test]
    fn readiness_accepts_setup_less_blueprints() {
        let status = |status: &str, provisioning: &str| ReservationStatus {
            status: status.to_string(),
            provisioning_status: provisioning.to_string(),
        };
        assert!(status("Started", "Ready").is_ready());
        assert!(status("Started", "Not Run").is_ready());
        assert!(!status("Pending", "Not Run").is_ready());
        assert!(!status("Started", "Setup").is_ready());
        assert!(status("Started", "Error").is_provisioning_error());
        assert!(status("Completed", "Teardown").is_completed());
    }
}

//! Testable entities: resources, deployment resources and services.
//!
//! A [`TargetDescriptor`] is the immutable view the registry and suite
//! builder consume; a [`TargetHandle`] binds it to a live reservation.

#![allow(missing_docs)]

pub mod descriptor;
pub mod handle;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::ShtError;

pub use descriptor::TargetDescriptor;
pub use handle::TargetHandle;

// ──────────────────── family ────────────────────

/// Structural category reported by the platform for a resource or service model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Family {
    Router,
    Firewall,
    Switch,
    TrafficGeneratorChassis,
    VirtualTrafficGeneratorChassis,
    TrafficGeneratorController,
    GenericAppFamily,
}

impl Family {
    pub const ALL: [Self; 7] = [
        Self::Router,
        Self::Firewall,
        Self::Switch,
        Self::TrafficGeneratorChassis,
        Self::VirtualTrafficGeneratorChassis,
        Self::TrafficGeneratorController,
        Self::GenericAppFamily,
    ];

    /// Platform family name (`CS_Router`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Router => "CS_Router",
            Self::Firewall => "CS_Firewall",
            Self::Switch => "CS_Switch",
            Self::TrafficGeneratorChassis => "CS_TrafficGeneratorChassis",
            Self::VirtualTrafficGeneratorChassis => "CS_VirtualTrafficGeneratorChassis",
            Self::TrafficGeneratorController => "CS_TrafficGeneratorController",
            Self::GenericAppFamily => "CS_GenericAppFamily",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `CS_Router` as well as the bare `Router`, case-insensitively.
impl FromStr for Family {
    type Err = ShtError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let bare = trimmed
            .get(..3)
            .filter(|prefix| prefix.eq_ignore_ascii_case("cs_"))
            .map_or(trimmed, |_| &trimmed[3..]);
        Self::ALL
            .into_iter()
            .find(|family| family.as_str()[3..].eq_ignore_ascii_case(bare))
            .ok_or_else(|| ShtError::UnknownFamily {
                family: raw.to_string(),
            })
    }
}

// ──────────────────── device availability ────────────────────

/// Whether a target is backed by a live device, a simulator, or nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAvailability {
    RealDevice,
    Simulator,
    WithoutDevice,
}

impl DeviceAvailability {
    pub const ALL: [Self; 3] = [Self::RealDevice, Self::Simulator, Self::WithoutDevice];

    /// No IP means no device; an IP plus a `User` attribute means a real
    /// device; an IP alone means a simulator.
    #[must_use]
    pub fn classify(device_ip: Option<&str>, attributes: &BTreeMap<String, String>) -> Self {
        let has_ip = device_ip.is_some_and(|ip| !ip.trim().is_empty());
        if !has_ip {
            return Self::WithoutDevice;
        }
        let has_user = attributes.iter().any(|(name, value)| {
            (name == "User" || name.ends_with(".User")) && !value.trim().is_empty()
        });
        if has_user {
            Self::RealDevice
        } else {
            Self::Simulator
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RealDevice => "Real device",
            Self::Simulator => "Simulator",
            Self::WithoutDevice => "Without device",
        }
    }
}

impl fmt::Display for DeviceAvailability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `real_device`, `real-device`, `Real device`, `RealDevice`, ...
impl FromStr for DeviceAvailability {
    type Err = ShtError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "realdevice" | "real" => Ok(Self::RealDevice),
            "simulator" => Ok(Self::Simulator),
            "withoutdevice" | "none" => Ok(Self::WithoutDevice),
            _ => Err(ShtError::InvalidConfig {
                details: format!("unknown device availability {raw:?}"),
            }),
        }
    }
}

// ──────────────────── target kind ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Resource,
    DeploymentResource,
    Service,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Resource => "Resource",
            Self::DeploymentResource => "Deployment resource",
            Self::Service => "Service",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn family_parses_with_and_without_prefix() {
        assert_eq!("CS_Router".parse::<Family>().unwrap(), Family::Router);
        assert_eq!("router".parse::<Family>().unwrap(), Family::Router);
        assert_eq!(
            "cs_trafficgeneratorcontroller".parse::<Family>().unwrap(),
            Family::TrafficGeneratorController
        );
        for family in Family::ALL {
            assert_eq!(family.to_string().parse::<Family>().unwrap(), family);
        }
    }

    #[test]
    fn unknown_family_is_a_config_error() {
        let err = "CS_LoadBalancer".parse::<Family>().unwrap_err();
        assert_eq!(err.code(), "SHT-1004");
        assert!(err.is_config_error());
        assert!(err.to_string().contains("CS_LoadBalancer"));
        assert!("CS".parse::<Family>().is_err());
    }

    #[test]
    fn availability_classification() {
        assert_eq!(
            DeviceAvailability::classify(None, &attrs(&[("User", "admin")])),
            DeviceAvailability::WithoutDevice
        );
        assert_eq!(
            DeviceAvailability::classify(Some("  "), &attrs(&[])),
            DeviceAvailability::WithoutDevice
        );
        assert_eq!(
            DeviceAvailability::classify(Some("10.0.0.1"), &attrs(&[("User", "admin")])),
            DeviceAvailability::RealDevice
        );
        assert_eq!(
            DeviceAvailability::classify(Some("10.0.0.1"), &attrs(&[("Password", "x")])),
            DeviceAvailability::Simulator
        );
        assert_eq!(
            DeviceAvailability::classify(Some("10.0.0.1"), &attrs(&[("User", "")])),
            DeviceAvailability::Simulator
        );
    }

    #[test]
    fn availability_parses_common_spellings() {
        for raw in ["real_device", "Real device", "RealDevice", "real-device"] {
            assert_eq!(
                raw.parse::<DeviceAvailability>().unwrap(),
                DeviceAvailability::RealDevice
            );
        }
        assert_eq!(
            "Without device".parse::<DeviceAvailability>().unwrap(),
            DeviceAvailability::WithoutDevice
        );
        assert!("maybe".parse::<DeviceAvailability>().is_err());
    }
}

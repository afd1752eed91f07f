//! Test case registry: family x device availability x command -> case kind.
//!
//! Tables are composed explicitly. Router is Firewall plus the connectivity
//! check for real devices, and Switch reuses Router unchanged.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;

use crate::core::errors::{Result, ShtError};
use crate::target::{DeviceAvailability, Family};

/// Command key under which every autoload variant is registered.
pub const AUTOLOAD_COMMAND: &str = "autoload";

/// Families whose suites always start with an autoload case.
pub const AUTOLOAD_FAMILIES: [Family; 6] = [
    Family::Router,
    Family::Firewall,
    Family::Switch,
    Family::TrafficGeneratorChassis,
    Family::VirtualTrafficGeneratorChassis,
    Family::GenericAppFamily,
];

// ──────────────────── case kinds ────────────────────

/// A group of related checks; each kind expands to one case per method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TestCaseKind {
    AutoloadNetworkDevices,
    AutoloadTrafficGeneratorDevices,
    AutoloadVirtualTrafficGeneratorDevices,
    AutoloadWithoutPorts,
    AutoloadWithoutDevice,
    RunCustomCommand,
    RunCustomCommandWithoutDevice,
    SaveConfig,
    SaveConfigWithoutDevice,
    RestoreConfig,
    RestoreConfigWithoutDevice,
    Connectivity,
    LoadConfig,
    LoadConfigWithoutDevice,
    StartTraffic,
    StartTrafficWithoutDevice,
    StopTraffic,
    StopTrafficWithoutDevice,
    GetStatistics,
    GetStatisticsWithoutDevice,
    GetTestFile,
    GetTestFileWithoutDevice,
}

const SAVE_METHODS: &[&str] = &[
    "save_running_config",
    "save_startup_config",
    "orchestration_save_shallow",
    "orchestration_save_deep",
];

const RESTORE_METHODS: &[&str] = &[
    "restore_running_config_append",
    "restore_startup_config_append",
    "restore_running_config_override",
    "restore_startup_config_override",
];

const CUSTOM_COMMAND_METHODS: &[&str] = &["run_custom_command", "run_custom_config_command"];

impl TestCaseKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AutoloadNetworkDevices => "AutoloadNetworkDevices",
            Self::AutoloadTrafficGeneratorDevices => "AutoloadTrafficGeneratorDevices",
            Self::AutoloadVirtualTrafficGeneratorDevices => {
                "AutoloadVirtualTrafficGeneratorDevices"
            }
            Self::AutoloadWithoutPorts => "AutoloadWithoutPorts",
            Self::AutoloadWithoutDevice => "AutoloadWithoutDevice",
            Self::RunCustomCommand => "RunCustomCommand",
            Self::RunCustomCommandWithoutDevice => "RunCustomCommandWithoutDevice",
            Self::SaveConfig => "SaveConfig",
            Self::SaveConfigWithoutDevice => "SaveConfigWithoutDevice",
            Self::RestoreConfig => "RestoreConfig",
            Self::RestoreConfigWithoutDevice => "RestoreConfigWithoutDevice",
            Self::Connectivity => "Connectivity",
            Self::LoadConfig => "LoadConfig",
            Self::LoadConfigWithoutDevice => "LoadConfigWithoutDevice",
            Self::StartTraffic => "StartTraffic",
            Self::StartTrafficWithoutDevice => "StartTrafficWithoutDevice",
            Self::StopTraffic => "StopTraffic",
            Self::StopTrafficWithoutDevice => "StopTrafficWithoutDevice",
            Self::GetStatistics => "GetStatistics",
            Self::GetStatisticsWithoutDevice => "GetStatisticsWithoutDevice",
            Self::GetTestFile => "GetTestFile",
            Self::GetTestFileWithoutDevice => "GetTestFileWithoutDevice",
        }
    }

    /// Individual checks of this kind, in execution order.
    #[must_use]
    pub const fn methods(self) -> &'static [&'static str] {
        match self {
            Self::AutoloadNetworkDevices
            | Self::AutoloadTrafficGeneratorDevices
            | Self::AutoloadVirtualTrafficGeneratorDevices
            | Self::AutoloadWithoutDevice => &["structure"],
            Self::AutoloadWithoutPorts => &["autoload"],
            Self::RunCustomCommand | Self::RunCustomCommandWithoutDevice => CUSTOM_COMMAND_METHODS,
            Self::SaveConfig | Self::SaveConfigWithoutDevice => SAVE_METHODS,
            Self::RestoreConfig | Self::RestoreConfigWithoutDevice => RESTORE_METHODS,
            Self::Connectivity => &["connectivity"],
            Self::LoadConfig | Self::LoadConfigWithoutDevice => &["load_config"],
            Self::StartTraffic | Self::StartTrafficWithoutDevice => &["start_traffic"],
            Self::StopTraffic | Self::StopTrafficWithoutDevice => &["stop_traffic"],
            Self::GetStatistics | Self::GetStatisticsWithoutDevice => &["get_statistics"],
            Self::GetTestFile | Self::GetTestFileWithoutDevice => &["get_test_file"],
        }
    }

    /// `Kind.method` names used as expected-failure keys.
    pub fn qualified_names(self) -> impl Iterator<Item = String> {
        self.methods()
            .iter()
            .map(move |method| format!("{}.{method}", self.name()))
    }

    /// Variants that assert the connection error instead of a business outcome.
    #[must_use]
    pub const fn expects_connection_error(self) -> bool {
        matches!(
            self,
            Self::AutoloadWithoutDevice
                | Self::RunCustomCommandWithoutDevice
                | Self::SaveConfigWithoutDevice
                | Self::RestoreConfigWithoutDevice
                | Self::LoadConfigWithoutDevice
                | Self::StartTrafficWithoutDevice
                | Self::StopTrafficWithoutDevice
                | Self::GetStatisticsWithoutDevice
                | Self::GetTestFileWithoutDevice
        )
    }
}

impl fmt::Display for TestCaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ──────────────────── tables ────────────────────

/// Command name (lowercase) -> case kind for one availability.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandTable {
    entries: BTreeMap<&'static str, TestCaseKind>,
}

impl CommandTable {
    #[must_use]
    pub fn new(entries: &[(&'static str, TestCaseKind)]) -> Self {
        Self::default().extend_with(entries)
    }

    /// Copy of `self` with `entries` added; later entries replace earlier ones.
    #[must_use]
    pub fn extend_with(mut self, entries: &[(&'static str, TestCaseKind)]) -> Self {
        self.entries.extend(entries.iter().copied());
        self
    }

    #[must_use]
    pub fn get(&self, command: &str) -> Option<TestCaseKind> {
        self.entries.get(command.to_lowercase().as_str()).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, TestCaseKind)> + '_ {
        self.entries.iter().map(|(command, kind)| (*command, *kind))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One command table per device availability; lookups are total.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyTable {
    pub real_device: CommandTable,
    pub simulator: CommandTable,
    pub without_device: CommandTable,
}

impl FamilyTable {
    #[must_use]
    pub const fn for_availability(&self, availability: DeviceAvailability) -> &CommandTable {
        match availability {
            DeviceAvailability::RealDevice => &self.real_device,
            DeviceAvailability::Simulator => &self.simulator,
            DeviceAvailability::WithoutDevice => &self.without_device,
        }
    }

    #[must_use]
    pub fn extend_with(
        mut self,
        availability: DeviceAvailability,
        entries: &[(&'static str, TestCaseKind)],
    ) -> Self {
        let table = match availability {
            DeviceAvailability::RealDevice => &mut self.real_device,
            DeviceAvailability::Simulator => &mut self.simulator,
            DeviceAvailability::WithoutDevice => &mut self.without_device,
        };
        *table = std::mem::take(table).extend_with(entries);
        self
    }
}

fn firewall_table() -> FamilyTable {
    use TestCaseKind as K;
    FamilyTable {
        real_device: CommandTable::new(&[
            (AUTOLOAD_COMMAND, K::AutoloadNetworkDevices),
            ("run_custom_command", K::RunCustomCommand),
            ("run_custom_config_command", K::RunCustomCommand),
            ("save", K::SaveConfig),
            ("orchestration_save", K::SaveConfig),
            ("restore", K::RestoreConfig),
            ("orchestration_restore", K::RestoreConfig),
        ]),
        simulator: CommandTable::new(&[(AUTOLOAD_COMMAND, K::AutoloadNetworkDevices)]),
        without_device: CommandTable::new(&[
            (AUTOLOAD_COMMAND, K::AutoloadWithoutDevice),
            ("run_custom_command", K::RunCustomCommandWithoutDevice),
            ("run_custom_config_command", K::RunCustomCommandWithoutDevice),
            ("save", K::SaveConfigWithoutDevice),
            ("orchestration_save", K::SaveConfigWithoutDevice),
            ("restore", K::RestoreConfigWithoutDevice),
            ("orchestration_restore", K::RestoreConfigWithoutDevice),
        ]),
    }
}

fn router_table() -> FamilyTable {
    firewall_table().extend_with(
        DeviceAvailability::RealDevice,
        &[("applyconnectivitychanges", TestCaseKind::Connectivity)],
    )
}

/// Autoload-only table: the device variant for real devices and simulators.
fn autoload_only_table(device_variant: TestCaseKind) -> FamilyTable {
    FamilyTable {
        real_device: CommandTable::new(&[(AUTOLOAD_COMMAND, device_variant)]),
        simulator: CommandTable::new(&[(AUTOLOAD_COMMAND, device_variant)]),
        without_device: CommandTable::new(&[(
            AUTOLOAD_COMMAND,
            TestCaseKind::AutoloadWithoutDevice,
        )]),
    }
}

fn controller_table() -> FamilyTable {
    use TestCaseKind as K;
    FamilyTable {
        real_device: CommandTable::new(&[
            ("load_config", K::LoadConfig),
            ("start_traffic", K::StartTraffic),
            ("stop_traffic", K::StopTraffic),
            ("get_statistics", K::GetStatistics),
            ("get_test_file", K::GetTestFile),
        ]),
        simulator: CommandTable::default(),
        without_device: CommandTable::new(&[
            ("load_config", K::LoadConfigWithoutDevice),
            ("start_traffic", K::StartTrafficWithoutDevice),
            ("stop_traffic", K::StopTrafficWithoutDevice),
            ("get_statistics", K::GetStatisticsWithoutDevice),
            ("get_test_file", K::GetTestFileWithoutDevice),
        ]),
    }
}

// ──────────────────── registry ────────────────────

#[derive(Debug, Clone, Default)]
pub struct Registry {
    families: HashMap<Family, FamilyTable>,
}

impl Registry {
    /// The built-in dispatch table covering every [`Family`].
    #[must_use]
    pub fn standard() -> Self {
        let router = router_table();
        Self::default()
            .with_family(Family::Firewall, firewall_table())
            .with_family(Family::Switch, router.clone())
            .with_family(Family::Router, router)
            .with_family(
                Family::TrafficGeneratorChassis,
                autoload_only_table(TestCaseKind::AutoloadTrafficGeneratorDevices),
            )
            .with_family(
                Family::VirtualTrafficGeneratorChassis,
                autoload_only_table(TestCaseKind::AutoloadVirtualTrafficGeneratorDevices),
            )
            .with_family(Family::TrafficGeneratorController, controller_table())
            .with_family(
                Family::GenericAppFamily,
                autoload_only_table(TestCaseKind::AutoloadWithoutPorts),
            )
    }

    #[must_use]
    pub fn with_family(mut self, family: Family, table: FamilyTable) -> Self {
        self.families.insert(family, table);
        self
    }

    pub fn family_table(&self, family: Family) -> Result<&FamilyTable> {
        self.families
            .get(&family)
            .ok_or_else(|| ShtError::UnknownFamily {
                family: family.to_string(),
            })
    }

    pub fn table(&self, family: Family, availability: DeviceAvailability) -> Result<&CommandTable> {
        Ok(self.family_table(family)?.for_availability(availability))
    }

    #[must_use]
    pub fn is_autoload_family(family: Family) -> bool {
        AUTOLOAD_FAMILIES.contains(&family)
    }

    /// Ordered, de-duplicated case kinds for a target.
    ///
    /// Autoload comes first for autoload families; the rest follow the
    /// platform's command order. Commands without an entry are skipped.
    pub fn plan(
        &self,
        family: Family,
        availability: DeviceAvailability,
        commands: &[String],
    ) -> Result<Vec<TestCaseKind>> {
        let table = self.table(family, availability)?;
        let mut kinds = Vec::new();
        if Self::is_autoload_family(family)
            && let Some(kind) = table.get(AUTOLOAD_COMMAND)
        {
            kinds.push(kind);
        }
        for command in commands {
            if let Some(kind) = table.get(command)
                && !kinds.contains(&kind)
            {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// Every registered row as `(family, availability, command, kind)`, sorted.
    #[must_use]
    pub fn rows(&self) -> Vec<(Family, DeviceAvailability, &'static str, TestCaseKind)> {
        let mut rows: Vec<_> = self
            .families
            .iter()
            .flat_map(|(family, table)| {
                DeviceAvailability::ALL.into_iter().flat_map(move |availability| {
                    table
                        .for_availability(availability)
                        .iter()
                        .map(move |(command, kind)| (*family, availability, command, kind))
                })
            })
            .collect();
        rows.sort();
        rows
    }
}

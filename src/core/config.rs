//! Configuration system: TOML test config + environment overlay + env var overrides.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ShtError};
use crate::target::DeviceAvailability;

/// Name of the only platform backend built into the binary.
pub const SIMULATED_BACKEND: &str = "simulated";

/// Full test-run configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct MainConfig {
    pub cloudshell: Option<CloudShellConfig>,
    #[serde(rename = "do")]
    pub do_conf: Option<DoConfig>,
    pub ftp: Option<FtpConfig>,
    pub store: StoreConfig,
    pub run: RunConfig,
    pub logging: LoggingConfig,
    pub shells: Vec<ShellConfig>,
    pub resources: Vec<ResourceConfig>,
    pub services: Vec<ServiceConfig>,
    pub deployment_resources: Vec<DeploymentResourceConfig>,
    pub sandboxes: Vec<SandboxConfig>,
    pub simulator: SimulatorConfig,
}

/// Connection to an existing CloudShell instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloudShellConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub domain: String,
    pub backend: String,
}

/// "Fresh CloudShell per run" mode: a CloudShell is deployed from a
/// topology on the DO (deployment orchestrator) host before the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DoConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub domain: String,
    pub cs_version: String,
    pub cs_specific_version: Option<String>,
    pub delete_cs: bool,
}

/// FTP server the devices save configuration to; `host` may carry a scheme
/// and a folder (`ftp://10.0.0.5/configs`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct FtpConfig {
    pub host: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

/// Where save/restore bodies look for configuration files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Local,
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub path: Option<PathBuf>,
    pub url: Option<String>,
}

impl FtpConfig {
    /// Save folder URL with the credentials inlined, as devices expect it.
    #[must_use]
    pub fn url(&self) -> String {
        let (scheme, path) = self.host.split_once("://").unwrap_or(("ftp", self.host.as_str()));
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => format!("{scheme}://{user}:{password}@{path}"),
            (Some(user), None) => format!("{scheme}://{user}@{path}"),
            _ => format!("{scheme}://{path}"),
        }
    }

    /// Bare host name, without scheme, folder or port.
    #[must_use]
    pub fn host_name(&self) -> &str {
        let rest = self.host.split_once("://").map_or(self.host.as_str(), |(_, r)| r);
        let authority = rest.split('/').next().unwrap_or(rest);
        authority.split(':').next().unwrap_or(authority)
    }
}

/// Worker pool, provisioning retry and reservation polling knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunConfig {
    pub pool_size: usize,
    pub provision_attempts: u32,
    pub reservation_poll_interval_ms: u64,
    pub reservation_poll_attempts: u32,
    pub cloudshell_startup_wait_ms: u64,
    pub reservation_duration_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub jsonl_path: Option<PathBuf>,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
    /// Echo every run event to stderr.
    pub console: bool,
}

/// Per-target test settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TestsConfig {
    /// `None` means "inherit"; the effective default is to run tests.
    pub run_tests: Option<bool>,
    /// Qualified case name (`SaveConfig.save_running_config`) -> error regex.
    pub expected_failures: BTreeMap<String, String>,
    /// Command name -> keyword parameters.
    pub params: BTreeMap<String, BTreeMap<String, String>>,
}

impl TestsConfig {
    /// Overlay `self` on top of `base`: entries present here win.
    #[must_use]
    pub fn merged_over(&self, base: &Self) -> Self {
        let mut expected_failures = base.expected_failures.clone();
        expected_failures.extend(self.expected_failures.clone());

        let mut params = base.params.clone();
        for (command, values) in &self.params {
            params
                .entry(command.clone())
                .or_default()
                .extend(values.clone());
        }

        Self {
            run_tests: self.run_tests.or(base.run_tests),
            expected_failures,
            params,
        }
    }

    #[must_use]
    pub fn should_run(&self) -> bool {
        self.run_tests.unwrap_or(true)
    }

    /// Parameters for a command; empty when none are configured.
    #[must_use]
    pub fn params_for(&self, command: &str) -> BTreeMap<String, String> {
        self.params.get(command).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ShellConfig {
    pub name: String,
    /// Shell package path handed to the platform installer.
    pub path: String,
    pub dependencies_path: Option<String>,
    pub extra_standards: Vec<String>,
    pub tests: TestsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ResourceConfig {
    pub name: String,
    pub shell_name: String,
    pub device_ip: Option<String>,
    pub attributes: BTreeMap<String, String>,
    /// Child path relative to the resource (`Chassis 1/Port 1`) -> attributes.
    pub children_attributes: BTreeMap<String, BTreeMap<String, String>>,
    pub is_first_gen: bool,
    pub tests: TestsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub shell_name: String,
    pub attributes: BTreeMap<String, String>,
    /// Resource (same sandbox) the service drives, e.g. a traffic generator chassis.
    pub related_resource: Option<String>,
    /// Overrides the default RealDevice classification.
    pub availability: Option<String>,
    pub tests: TestsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct DeploymentResourceConfig {
    pub name: String,
    /// Blueprint (topology) whose app deploys this resource.
    pub blueprint_name: String,
    pub attributes: BTreeMap<String, String>,
    pub children_attributes: BTreeMap<String, BTreeMap<String, String>>,
    pub is_first_gen: bool,
    pub tests: TestsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SandboxConfig {
    pub name: String,
    pub resource_names: Vec<String>,
    pub service_names: Vec<String>,
    pub deployment_resource_names: Vec<String>,
    /// Reserve from a topology instead of creating an empty reservation.
    pub blueprint_name: Option<String>,
    pub specific_version: Option<String>,
}

/// Seed data for the in-process simulated platform backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SimulatorConfig {
    pub shells: Vec<SimulatedShellConfig>,
    pub topologies: Vec<SimulatedTopologyConfig>,
    /// Number of fresh-CloudShell deployments that come up dead before one succeeds.
    pub failed_deployments: u32,
    /// Hosts that do not answer the pre-run liveness check.
    pub unreachable_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SimulatedShellConfig {
    /// Package path matched against `ShellConfig::path`.
    pub path: String,
    pub model: String,
    pub family: String,
    pub commands: Vec<String>,
    /// The shell defines a service model rather than a resource model.
    pub service: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SimulatedTopologyConfig {
    pub name: String,
    pub category: String,
    pub apps: Vec<SimulatedAppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct SimulatedAppConfig {
    pub name: String,
    pub model: String,
    pub family: String,
    pub address: String,
    pub commands: Vec<String>,
}

impl Default for CloudShellConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            password: String::new(),
            domain: "Global".to_string(),
            backend: SIMULATED_BACKEND.to_string(),
        }
    }
}

impl Default for DoConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            password: String::new(),
            domain: "Global".to_string(),
            cs_version: "CloudShell 8.3 GA - IL".to_string(),
            cs_specific_version: None,
            delete_cs: true,
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            provision_attempts: 5,
            reservation_poll_interval_ms: 1_000,
            reservation_poll_attempts: 60,
            cloudshell_startup_wait_ms: 0,
            reservation_duration_minutes: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            fallback_path: None,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
            console: false,
        }
    }
}

impl MainConfig {
    /// Load the test config, overlay the optional environment config, then
    /// apply `SHT_*` env overrides and validate.
    pub fn load(test_conf: &Path, env_conf: Option<&Path>) -> Result<Self> {
        let mut merged = read_toml_value(test_conf)?;
        if let Some(env_path) = env_conf {
            let overlay = read_toml_value(env_path)?;
            merge_values(&mut merged, overlay);
        }

        let mut cfg: Self = merged.try_into()?;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse an in-memory TOML document without env overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the run log.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    /// `[store]` with its URL filled from `[ftp]` when only the latter is set.
    #[must_use]
    pub fn effective_store(&self) -> StoreConfig {
        let mut store = self.store.clone();
        if store.url.is_none() {
            store.url = self.ftp.as_ref().map(FtpConfig::url);
        }
        store
    }

    /// `(name, host)` pairs that must answer before anything is provisioned:
    /// every resource with a device, the FTP server and the DO host, or the
    /// CloudShell host when no DO is configured.
    #[must_use]
    pub fn liveness_targets(&self) -> Vec<(String, String)> {
        let mut targets: Vec<(String, String)> = self
            .resources
            .iter()
            .filter_map(|r| r.device_ip.as_ref().map(|ip| (r.name.clone(), ip.clone())))
            .collect();
        if let Some(ftp) = &self.ftp {
            targets.push(("FTP".to_string(), ftp.host_name().to_string()));
        }
        if let Some(do_conf) = &self.do_conf {
            targets.push(("Do".to_string(), do_conf.host.clone()));
        } else if let Some(cs) = &self.cloudshell {
            targets.push(("CloudShell".to_string(), cs.host.clone()));
        }
        targets
    }

    #[must_use]
    pub fn shell(&self, name: &str) -> Option<&ShellConfig> {
        self.shells.iter().find(|shell| shell.name == name)
    }

    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|service| service.name == name)
    }

    #[must_use]
    pub fn deployment_resource(&self, name: &str) -> Option<&DeploymentResourceConfig> {
        self.deployment_resources
            .iter()
            .find(|resource| resource.name == name)
    }

    /// Effective tests config for a resource: shell-level settings under resource-level ones.
    #[must_use]
    pub fn resource_tests(&self, resource: &ResourceConfig) -> TestsConfig {
        self.shell(&resource.shell_name).map_or_else(
            || resource.tests.clone(),
            |shell| resource.tests.merged_over(&shell.tests),
        )
    }

    #[must_use]
    pub fn service_tests(&self, service: &ServiceConfig) -> TestsConfig {
        self.shell(&service.shell_name).map_or_else(
            || service.tests.clone(),
            |shell| service.tests.merged_over(&shell.tests),
        )
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let host = lookup("SHT_CLOUDSHELL_HOST");
        let user = lookup("SHT_CLOUDSHELL_USER");
        let password = lookup("SHT_CLOUDSHELL_PASSWORD");
        let domain = lookup("SHT_CLOUDSHELL_DOMAIN");
        if host.is_some() || user.is_some() || password.is_some() || domain.is_some() {
            let cs = self.cloudshell.get_or_insert_with(CloudShellConfig::default);
            if let Some(host) = host {
                cs.host = host;
            }
            if let Some(user) = user {
                cs.user = user;
            }
            if let Some(password) = password {
                cs.password = password;
            }
            if let Some(domain) = domain {
                cs.domain = domain;
            }
        }

        if let Some(raw) = lookup("SHT_RUN_POOL_SIZE") {
            self.run.pool_size = parse_env("SHT_RUN_POOL_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("SHT_RUN_PROVISION_ATTEMPTS") {
            self.run.provision_attempts = parse_env("SHT_RUN_PROVISION_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("SHT_RUN_RESERVATION_POLL_INTERVAL_MS") {
            self.run.reservation_poll_interval_ms =
                parse_env("SHT_RUN_RESERVATION_POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = lookup("SHT_LOGGING_JSONL_PATH") {
            self.logging.jsonl_path = Some(PathBuf::from(raw));
        }
        if let Some(raw) = lookup("SHT_LOGGING_CONSOLE") {
            self.logging.console = parse_env("SHT_LOGGING_CONSOLE", &raw)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn validate(&self) -> Result<()> {
        match (&self.cloudshell, &self.do_conf) {
            (None, None) => {
                return Err(ShtError::InvalidConfig {
                    details: "either a [cloudshell] or a [do] section is required".to_string(),
                });
            }
            (Some(cs), _) if cs.backend != SIMULATED_BACKEND => {
                return Err(ShtError::InvalidConfig {
                    details: format!(
                        "cloudshell.backend {:?} is not supported (available: {SIMULATED_BACKEND})",
                        cs.backend
                    ),
                });
            }
            _ => {}
        }

        if self.run.pool_size == 0 {
            return Err(ShtError::InvalidConfig {
                details: "run.pool_size must be >= 1".to_string(),
            });
        }
        if self.run.provision_attempts == 0 {
            return Err(ShtError::InvalidConfig {
                details: "run.provision_attempts must be >= 1".to_string(),
            });
        }
        if self.run.reservation_poll_attempts == 0 {
            return Err(ShtError::InvalidConfig {
                details: "run.reservation_poll_attempts must be >= 1".to_string(),
            });
        }
        if self.sandboxes.is_empty() {
            return Err(ShtError::InvalidConfig {
                details: "at least one [[sandboxes]] entry is required".to_string(),
            });
        }
        if self.store.kind == StoreKind::Local && self.store.path.is_none() {
            return Err(ShtError::InvalidConfig {
                details: "store.path is required when store.kind = \"local\"".to_string(),
            });
        }
        if let Some(ftp) = &self.ftp
            && ftp.host_name().is_empty()
        {
            return Err(ShtError::InvalidConfig {
                details: "ftp.host must name a server".to_string(),
            });
        }

        ensure_unique("shells", self.shells.iter().map(|s| s.name.as_str()))?;
        ensure_unique("resources", self.resources.iter().map(|r| r.name.as_str()))?;
        ensure_unique("services", self.services.iter().map(|s| s.name.as_str()))?;
        ensure_unique(
            "deployment_resources",
            self.deployment_resources.iter().map(|d| d.name.as_str()),
        )?;
        ensure_unique("sandboxes", self.sandboxes.iter().map(|s| s.name.as_str()))?;

        for shell in &self.shells {
            validate_tests(&format!("shell {}", shell.name), &shell.tests)?;
        }

        for resource in &self.resources {
            if self.shell(&resource.shell_name).is_none() {
                return Err(ShtError::InvalidConfig {
                    details: format!(
                        "resource {} references unknown shell {}",
                        resource.name, resource.shell_name
                    ),
                });
            }
            validate_tests(&format!("resource {}", resource.name), &resource.tests)?;
        }

        for service in &self.services {
            if self.shell(&service.shell_name).is_none() {
                return Err(ShtError::InvalidConfig {
                    details: format!(
                        "service {} references unknown shell {}",
                        service.name, service.shell_name
                    ),
                });
            }
            if let Some(raw) = &service.availability {
                raw.parse::<DeviceAvailability>()
                    .map_err(|_| ShtError::InvalidConfig {
                        details: format!(
                            "service {} has unknown availability {raw:?}",
                            service.name
                        ),
                    })?;
            }
            validate_tests(&format!("service {}", service.name), &service.tests)?;
        }

        for deployment in &self.deployment_resources {
            if deployment.blueprint_name.is_empty() {
                return Err(ShtError::InvalidConfig {
                    details: format!(
                        "deployment resource {} needs a blueprint_name",
                        deployment.name
                    ),
                });
            }
            validate_tests(
                &format!("deployment resource {}", deployment.name),
                &deployment.tests,
            )?;
        }

        for sandbox in &self.sandboxes {
            for name in &sandbox.resource_names {
                if self.resource(name).is_none() {
                    return Err(unknown_member(&sandbox.name, "resource", name));
                }
            }
            for name in &sandbox.service_names {
                let Some(service) = self.service(name) else {
                    return Err(unknown_member(&sandbox.name, "service", name));
                };
                if let Some(related) = &service.related_resource
                    && !sandbox.resource_names.contains(related)
                {
                    return Err(ShtError::InvalidConfig {
                        details: format!(
                            "service {name} relates to resource {related} \
                             which is not in sandbox {}",
                            sandbox.name
                        ),
                    });
                }
            }
            for name in &sandbox.deployment_resource_names {
                if self.deployment_resource(name).is_none() {
                    return Err(unknown_member(&sandbox.name, "deployment resource", name));
                }
            }
            if !sandbox.deployment_resource_names.is_empty() && sandbox.blueprint_name.is_none() {
                return Err(ShtError::InvalidConfig {
                    details: format!(
                        "sandbox {} has deployment resources but no blueprint_name",
                        sandbox.name
                    ),
                });
            }
        }

        Ok(())
    }
}

fn unknown_member(sandbox: &str, kind: &str, name: &str) -> ShtError {
    ShtError::InvalidConfig {
        details: format!("sandbox {sandbox} references unknown {kind} {name}"),
    }
}

fn ensure_unique<'a>(section: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ShtError::InvalidConfig {
                details: format!("{section} entry without a name"),
            });
        }
        if !seen.insert(name) {
            return Err(ShtError::InvalidConfig {
                details: format!("duplicate name {name:?} in {section}"),
            });
        }
    }
    Ok(())
}

fn validate_tests(owner: &str, tests: &TestsConfig) -> Result<()> {
    for (case, pattern) in &tests.expected_failures {
        Regex::new(pattern).map_err(|error| ShtError::InvalidConfig {
            details: format!("{owner}: expected failure pattern for {case} is invalid: {error}"),
        })?;
    }
    Ok(())
}

fn read_toml_value(path: &Path) -> Result<toml::Value> {
    if !path.exists() {
        return Err(ShtError::MissingConfig {
            path: path.to_path_buf(),
        });
    }
    let raw = fs::read_to_string(path).map_err(|source| ShtError::io(path, source))?;
    let value: toml::Value = toml::from_str(&raw)?;
    Ok(value)
}

/// Recursive table merge; everything else in `overlay` replaces `base`.
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| ShtError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

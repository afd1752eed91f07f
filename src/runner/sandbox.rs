//! One sandbox: its reservation, the targets prepared inside it, and the
//! guaranteed release of both.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::config::{MainConfig, SandboxConfig};
use crate::core::errors::{Result, ShtError};
use crate::logger::events::{RunEvent, RunLoggerHandle};
use crate::platform::CloudShellApi;
use crate::registry::Registry;
use crate::report::{SandboxReport, TargetReport};
use crate::runner::cancel::CancelToken;
use crate::runner::executor::Executor;
use crate::suite::{CaseContext, SuitePlan};
use crate::target::{DeviceAvailability, Family, TargetDescriptor, TargetHandle, TargetKind};
use crate::transport::FileStore;

/// Address given to resources configured without a device IP.
pub const PLACEHOLDER_ADDRESS: &str = "127.0.0.1";

// ──────────────────── readiness ────────────────────

/// Poll until the reservation is ready to use.
///
/// A provisioning error ends the wait with the reservation's activity errors;
/// running out of attempts ends it too.
pub fn wait_reservation_ready(
    api: &dyn CloudShellApi,
    reservation_id: &str,
    interval: Duration,
    attempts: u32,
    cancel: &CancelToken,
) -> Result<()> {
    for attempt in 1..=attempts.max(1) {
        let status = api
            .get_reservation_status(reservation_id)
            .map_err(|e| ShtError::platform("get_reservation_status", e))?;
        if status.is_ready() {
            return Ok(());
        }
        if status.is_provisioning_error() {
            let errors = api
                .get_reservation_details(reservation_id)
                .map(|details| details.errors.join("; "))
                .unwrap_or_default();
            return Err(ShtError::ReservationNotReady {
                reservation_id: reservation_id.to_string(),
                details: format!("provisioning failed: {errors}"),
            });
        }
        if attempt < attempts && !cancel.sleep(interval) {
            return Err(ShtError::Interrupted);
        }
    }
    Err(ShtError::ReservationNotReady {
        reservation_id: reservation_id.to_string(),
        details: format!("still not ready after {attempts} status checks"),
    })
}

/// Attribute namespace: the model for 2nd-gen shells, none for 1st-gen.
fn attribute_namespace(model: &str, is_first_gen: bool) -> &str {
    if is_first_gen { "" } else { model }
}

fn parse_family(raw: &str, target: &str) -> Result<Family> {
    raw.parse::<Family>().map_err(|_| ShtError::UnknownFamily {
        family: format!("{raw} (target {target})"),
    })
}

// ──────────────────── session ────────────────────

/// Shared inputs a session needs from the run.
pub struct SessionEnv<'a> {
    pub config: &'a MainConfig,
    /// Shell name -> installed model name.
    pub models: &'a HashMap<String, String>,
    pub api: Arc<dyn CloudShellApi>,
    pub store: Arc<dyn FileStore>,
    pub cancel: CancelToken,
    pub logger: RunLoggerHandle,
}

struct PreparedService {
    handle: Arc<TargetHandle>,
    related: Option<Arc<TargetHandle>>,
}

/// What running a sandbox's targets produced: every finished target report,
/// plus the error that cut the sandbox short, if any.
#[derive(Debug)]
pub struct SandboxRun {
    pub report: SandboxReport,
    pub error: Option<ShtError>,
}

impl SandboxRun {
    pub fn into_result(self) -> Result<SandboxReport> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

/// A live reservation plus its prepared targets. Released on drop.
pub struct SandboxSession {
    name: String,
    api: Arc<dyn CloudShellApi>,
    store: Arc<dyn FileStore>,
    logger: RunLoggerHandle,
    reservation_id: String,
    created_resources: Vec<String>,
    deployment_resources: Vec<Arc<TargetHandle>>,
    resources: Vec<Arc<TargetHandle>>,
    services: Vec<PreparedService>,
    released: bool,
}

impl std::fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxSession")
            .field("name", &self.name)
            .field("reservation_id", &self.reservation_id)
            .field("created_resources", &self.created_resources)
            .finish_non_exhaustive()
    }
}

impl SandboxSession {
    /// Reserve, wait for readiness and prepare every configured target.
    ///
    /// On failure the partially built session is dropped, which releases
    /// the reservation and anything created so far.
    pub fn open(env: &SessionEnv<'_>, sandbox: &SandboxConfig) -> Result<Self> {
        let run = &env.config.run;
        let reservation_id = match &sandbox.blueprint_name {
            Some(blueprint) => env
                .api
                .create_topology_reservation(
                    &sandbox.name,
                    blueprint,
                    run.reservation_duration_minutes,
                    sandbox.specific_version.as_deref(),
                )
                .map_err(|e| ShtError::platform("create_topology_reservation", e))?,
            None => env
                .api
                .create_reservation(&sandbox.name, run.reservation_duration_minutes)
                .map_err(|e| ShtError::platform("create_reservation", e))?,
        };
        env.logger.send(RunEvent::ReservationCreated {
            sandbox: sandbox.name.clone(),
            reservation_id: reservation_id.clone(),
        });

        let mut session = Self {
            name: sandbox.name.clone(),
            api: Arc::clone(&env.api),
            store: Arc::clone(&env.store),
            logger: env.logger.clone(),
            reservation_id,
            created_resources: Vec::new(),
            deployment_resources: Vec::new(),
            resources: Vec::new(),
            services: Vec::new(),
            released: false,
        };

        wait_reservation_ready(
            session.api.as_ref(),
            &session.reservation_id,
            Duration::from_millis(run.reservation_poll_interval_ms),
            run.reservation_poll_attempts,
            &env.cancel,
        )?;

        for name in &sandbox.deployment_resource_names {
            session.prepare_deployment_resource(env, name)?;
        }
        let mut by_config_name = HashMap::new();
        for name in &sandbox.resource_names {
            let handle = session.prepare_resource(env, name)?;
            by_config_name.insert(name.clone(), handle);
        }
        for name in &sandbox.service_names {
            session.prepare_service(env, name, &by_config_name)?;
        }
        Ok(session)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn reservation_id(&self) -> &str {
        &self.reservation_id
    }

    fn prepared(&self, handle: &TargetHandle) {
        let descriptor = handle.descriptor();
        descriptor.mark_provisioned();
        self.logger.send(RunEvent::TargetPrepared {
            sandbox: self.name.clone(),
            target: descriptor.name.clone(),
            details: format!(
                "{} {} ({}), {} commands",
                descriptor.kind,
                descriptor.family,
                descriptor.availability,
                descriptor.supported_commands.len()
            ),
        });
    }

    fn set_attributes(
        &self,
        name: &str,
        model: &str,
        is_first_gen: bool,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        if attributes.is_empty() {
            return Ok(());
        }
        self.api
            .set_resource_attributes(name, attribute_namespace(model, is_first_gen), attributes)
            .map_err(|e| ShtError::platform("set_resource_attributes", e))
    }

    fn prepare_deployment_resource(&mut self, env: &SessionEnv<'_>, name: &str) -> Result<()> {
        let conf = env
            .config
            .deployment_resource(name)
            .ok_or_else(|| ShtError::InvalidConfig {
                details: format!("unknown deployment resource {name}"),
            })?;
        let details = self
            .api
            .get_reservation_details(&self.reservation_id)
            .map_err(|e| ShtError::platform("get_reservation_details", e))?;
        let app_prefix = format!("{}_", conf.blueprint_name);
        let deployed = details
            .resources
            .iter()
            .find(|resource| {
                *resource == &conf.blueprint_name || resource.starts_with(&app_prefix)
            })
            .ok_or_else(|| ShtError::Runtime {
                details: format!(
                    "no resource deployed from {} in reservation {}",
                    conf.blueprint_name, self.reservation_id
                ),
            })?;
        let final_name = if deployed == &conf.name {
            deployed.clone()
        } else {
            self.api
                .rename_resource(deployed, &conf.name)
                .map_err(|e| ShtError::platform("rename_resource", e))?
        };

        let info = self
            .api
            .get_resource_details(&final_name)
            .map_err(|e| ShtError::platform("get_resource_details", e))?;
        self.set_attributes(&final_name, &info.model, conf.is_first_gen, &conf.attributes)?;
        let commands = self
            .api
            .get_resource_commands(&final_name)
            .map_err(|e| ShtError::platform("get_resource_commands", e))?;

        let descriptor = TargetDescriptor::new(
            final_name.as_str(),
            TargetKind::DeploymentResource,
            parse_family(&info.family, &final_name)?,
            DeviceAvailability::RealDevice,
            commands,
        )
        .with_model(info.model.as_str())
        .with_device_ip(Some(info.address.clone()))
        .with_tests(conf.tests.clone());
        let handle =
            TargetHandle::new(descriptor, Arc::clone(&self.api), self.reservation_id.as_str())
                .with_children_attributes(conf.children_attributes.clone());
        self.prepared(&handle);
        self.deployment_resources.push(Arc::new(handle));
        Ok(())
    }

    fn prepare_resource(&mut self, env: &SessionEnv<'_>, name: &str) -> Result<Arc<TargetHandle>> {
        let conf = env.config.resource(name).ok_or_else(|| ShtError::InvalidConfig {
            details: format!("unknown resource {name}"),
        })?;
        let model = env
            .models
            .get(&conf.shell_name)
            .ok_or_else(|| ShtError::InvalidConfig {
                details: format!("shell {} was not installed", conf.shell_name),
            })?;
        let address = conf
            .device_ip
            .as_deref()
            .filter(|ip| !ip.trim().is_empty())
            .unwrap_or(PLACEHOLDER_ADDRESS);

        let final_name = self
            .api
            .create_resource(&conf.name, model, address)
            .map_err(|e| ShtError::platform("create_resource", e))?;
        self.created_resources.push(final_name.clone());

        self.set_attributes(&final_name, model, conf.is_first_gen, &conf.attributes)?;
        self.api
            .add_resource_to_reservation(&self.reservation_id, &final_name)
            .map_err(|e| ShtError::platform("add_resource_to_reservation", e))?;
        let info = self
            .api
            .get_resource_details(&final_name)
            .map_err(|e| ShtError::platform("get_resource_details", e))?;
        let commands = self
            .api
            .get_resource_commands(&final_name)
            .map_err(|e| ShtError::platform("get_resource_commands", e))?;

        let descriptor = TargetDescriptor::new(
            final_name.as_str(),
            TargetKind::Resource,
            parse_family(&info.family, &final_name)?,
            DeviceAvailability::classify(conf.device_ip.as_deref(), &conf.attributes),
            commands,
        )
        .with_model(model.as_str())
        .with_device_ip(conf.device_ip.clone())
        .with_tests(env.config.resource_tests(conf));
        let handle = Arc::new(
            TargetHandle::new(descriptor, Arc::clone(&self.api), self.reservation_id.as_str())
                .with_children_attributes(conf.children_attributes.clone()),
        );
        self.prepared(&handle);
        self.resources.push(Arc::clone(&handle));
        Ok(handle)
    }

    fn prepare_service(
        &mut self,
        env: &SessionEnv<'_>,
        name: &str,
        resources: &HashMap<String, Arc<TargetHandle>>,
    ) -> Result<()> {
        let conf = env.config.service(name).ok_or_else(|| ShtError::InvalidConfig {
            details: format!("unknown service {name}"),
        })?;
        let model = env
            .models
            .get(&conf.shell_name)
            .ok_or_else(|| ShtError::InvalidConfig {
                details: format!("shell {} was not installed", conf.shell_name),
            })?;
        self.api
            .add_service_to_reservation(&self.reservation_id, model, &conf.name, &conf.attributes)
            .map_err(|e| ShtError::platform("add_service_to_reservation", e))?;
        let service_model = self
            .api
            .get_service_model(model)
            .map_err(|e| ShtError::platform("get_service_model", e))?;

        let availability = match &conf.availability {
            Some(raw) => raw.parse::<DeviceAvailability>()?,
            None => DeviceAvailability::RealDevice,
        };
        let related = conf
            .related_resource
            .as_ref()
            .and_then(|resource| resources.get(resource))
            .cloned();

        let descriptor = TargetDescriptor::new(
            conf.name.as_str(),
            TargetKind::Service,
            parse_family(&service_model.family, &conf.name)?,
            availability,
            service_model.commands,
        )
        .with_model(model.as_str())
        .with_tests(env.config.service_tests(conf))
        .with_related_resource(related.as_ref().map(|handle| handle.name().to_string()));
        let handle = Arc::new(TargetHandle::new(
            descriptor,
            Arc::clone(&self.api),
            self.reservation_id.as_str(),
        ));
        self.prepared(&handle);
        self.services.push(PreparedService { handle, related });
        Ok(())
    }

    // ──────────────────── tests ────────────────────

    /// Run every target whose tests are enabled, in deployment resource,
    /// resource, service order. A target that cannot be planned stops the
    /// sandbox, but the reports of targets that already ran are kept.
    pub fn run_tests(&self, registry: &Registry, executor: &Executor) -> SandboxRun {
        let mut report = SandboxReport::new(self.name.as_str());
        let error = self.collect_reports(registry, executor, &mut report).err();
        SandboxRun { report, error }
    }

    fn collect_reports(
        &self,
        registry: &Registry,
        executor: &Executor,
        report: &mut SandboxReport,
    ) -> Result<()> {
        for handle in &self.deployment_resources {
            if let Some(target) = self.run_target(registry, executor, handle, None)? {
                report.deployment_resources.push(target);
            }
        }
        for handle in &self.resources {
            if let Some(target) = self.run_target(registry, executor, handle, None)? {
                report.resources.push(target);
            }
        }
        for service in &self.services {
            let related = service.related.clone();
            if let Some(target) = self.run_target(registry, executor, &service.handle, related)? {
                report.services.push(target);
            }
        }
        Ok(())
    }

    fn run_target(
        &self,
        registry: &Registry,
        executor: &Executor,
        handle: &Arc<TargetHandle>,
        related: Option<Arc<TargetHandle>>,
    ) -> Result<Option<TargetReport>> {
        let descriptor = handle.descriptor();
        if !descriptor.tests.should_run() {
            return Ok(None);
        }
        let plan = SuitePlan::build(descriptor, registry)?;
        let suite = plan.bind(
            CaseContext::new(Arc::clone(handle), Arc::clone(&self.store)).with_related(related),
        );
        let (success, text) = executor.run(&suite);
        Ok(Some(TargetReport::from_descriptor(descriptor, success, text)))
    }

    // ──────────────────── release ────────────────────

    /// End and delete the reservation, then delete the resources this session
    /// created. Every step is attempted; the first failure is returned.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let started = Instant::now();

        let mut first_error: Option<ShtError> = None;
        let mut record = |result: std::result::Result<(), ShtError>| {
            if let Err(err) = result
                && first_error.is_none()
            {
                first_error = Some(err);
            }
        };

        record(
            self.api
                .end_reservation(&self.reservation_id)
                .map_err(|e| ShtError::platform("end_reservation", e)),
        );
        record(
            self.api
                .delete_reservation(&self.reservation_id)
                .map_err(|e| ShtError::platform("delete_reservation", e)),
        );
        for name in self.created_resources.drain(..) {
            record(
                self.api
                    .delete_resource(&name)
                    .map_err(|e| ShtError::platform("delete_resource", e)),
            );
        }

        self.logger.send(RunEvent::ReservationReleased {
            sandbox: self.name.clone(),
            reservation_id: self.reservation_id.clone(),
            ok: first_error.is_none(),
            details: first_error.as_ref().map(|err| {
                format!("{err} (after {} ms)", started.elapsed().as_millis())
            }),
        });
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for SandboxSession {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            self.logger.error(Some(&self.name), &err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{
        SimulatedAppConfig, SimulatedShellConfig, SimulatedTopologyConfig, SimulatorConfig,
    };
    use crate::platform::ApiError;
    use crate::platform::simulated::SimulatedCloudShell;
    use crate::runner::reporter::ReporterKind;
    use crate::transport::MemoryStore;

    const CONFIG: &str = r#"
[cloudshell]
host = "cs.local"
user = "admin"
password = "admin"

[run]
reservation_poll_interval_ms = 1
reservation_poll_attempts = 5

[[shells]]
name = "ios"
path = "ios.zip"

[[shells]]
name = "ixia"
path = "ixia.zip"

[[resources]]
name = "router"
shell_name = "ios"
device_ip = "10.0.0.1"
[resources.attributes]
User = "admin"

[[resources]]
name = "fake"
shell_name = "ios"

[[services]]
name = "controller"
shell_name = "ixia"
availability = "without_device"
related_resource = "router"
[services.attributes]
Address = "127.0.0.1"

[[deployment_resources]]
name = "vm-router"
blueprint_name = "vrouter"

[[sandboxes]]
name = "sb"
resource_names = ["router", "fake"]
service_names = ["controller"]
deployment_resource_names = ["vm-router"]
blueprint_name = "Router Blueprint"
"#;

    fn simulator_config() -> SimulatorConfig {
        SimulatorConfig {
            shells: vec![
                SimulatedShellConfig {
                    path: "ios.zip".to_string(),
                    model: "Cisco IOS Router 2G".to_string(),
                    family: "CS_Router".to_string(),
                    commands: vec![
                        "run_custom_command".to_string(),
                        "run_custom_config_command".to_string(),
                    ],
                    service: false,
                },
                SimulatedShellConfig {
                    path: "ixia.zip".to_string(),
                    model: "Ixia Controller 2G".to_string(),
                    family: "CS_TrafficGeneratorController".to_string(),
                    commands: vec!["start_traffic".to_string(), "stop_traffic".to_string()],
                    service: true,
                },
            ],
            topologies: vec![SimulatedTopologyConfig {
                name: "Router Blueprint".to_string(),
                category: "Shells".to_string(),
                apps: vec![SimulatedAppConfig {
                    name: "vrouter".to_string(),
                    model: "Cisco IOS Router 2G".to_string(),
                    family: "CS_Router".to_string(),
                    address: "10.0.1.1".to_string(),
                    commands: vec![
                        "run_custom_command".to_string(),
                        "run_custom_config_command".to_string(),
                    ],
                }],
            }],
            failed_deployments: 0,
            unreachable_hosts: Vec::new(),
        }
    }

    struct Fixture {
        config: MainConfig,
        models: HashMap<String, String>,
        sim: Arc<SimulatedCloudShell>,
        store: Arc<dyn FileStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let store: Arc<dyn FileStore> = Arc::new(MemoryStore::new("ftp://10.0.0.5"));
            let sim = Arc::new(SimulatedCloudShell::new(
                "cs.local",
                simulator_config(),
                Arc::clone(&store),
            ));
            let mut models = HashMap::new();
            models.insert("ios".to_string(), sim.install_shell("ios.zip").unwrap());
            models.insert("ixia".to_string(), sim.install_shell("ixia.zip").unwrap());
            Self {
                config: MainConfig::from_toml_str(CONFIG).unwrap(),
                models,
                sim,
                store,
            }
        }

        fn env(&self) -> SessionEnv<'_> {
            SessionEnv {
                config: &self.config,
                models: &self.models,
                api: self.sim.clone(),
                store: Arc::clone(&self.store),
                cancel: CancelToken::new(),
                logger: RunLoggerHandle::disabled(),
            }
        }
    }

    #[test]
    fn open_prepares_every_target_kind() {
        let fixture = Fixture::new();
        let mut session =
            SandboxSession::open(&fixture.env(), &fixture.config.sandboxes[0]).unwrap();

        assert_eq!(session.deployment_resources[0].name(), "vm-router");
        assert_eq!(session.resources.len(), 2);
        assert_eq!(
            session.resources[0].descriptor().availability,
            DeviceAvailability::RealDevice
        );
        assert_eq!(
            session.resources[1].descriptor().availability,
            DeviceAvailability::WithoutDevice
        );
        assert!(session.resources.iter().all(|r| r.descriptor().is_provisioned()));
        let service = &session.services[0];
        assert_eq!(service.handle.descriptor().family, Family::TrafficGeneratorController);
        assert_eq!(service.related.as_ref().unwrap().name(), "router");

        let attrs = fixture.sim.get_resource_details("router").unwrap();
        assert!(attrs.attributes.iter().any(|a| a.name == "Cisco IOS Router 2G.User"));

        session.release().unwrap();
        assert!(fixture.sim.active_reservations().is_empty());
        assert!(fixture.sim.resource_names().is_empty());
    }

    #[test]
    fn run_tests_reports_each_target() {
        let fixture = Fixture::new();
        let session = SandboxSession::open(&fixture.env(), &fixture.config.sandboxes[0]).unwrap();
        let executor = Executor::new(CancelToken::new(), RunLoggerHandle::disabled())
            .with_reporter(ReporterKind::Text);
        let report = session
            .run_tests(&Registry::standard(), &executor)
            .into_result()
            .unwrap();

        assert_eq!(report.deployment_resources.len(), 1);
        assert_eq!(report.resources.len(), 2);
        assert_eq!(report.services.len(), 1);
        assert!(report.is_success(), "{}", report.render_text());
        drop(session);
        assert!(fixture.sim.active_reservations().is_empty());
    }

    #[test]
    fn unplannable_target_keeps_reports_that_already_ran() {
        let fixture = Fixture::new();
        let session = SandboxSession::open(&fixture.env(), &fixture.config.sandboxes[0]).unwrap();
        let executor = Executor::new(CancelToken::new(), RunLoggerHandle::disabled())
            .with_reporter(ReporterKind::Text);
        let router = Registry::standard().family_table(Family::Router).unwrap().clone();
        let routers_only = Registry::default().with_family(Family::Router, router);

        let run = session.run_tests(&routers_only, &executor);
        assert_eq!(run.error.as_ref().unwrap().code(), "SHT-1004");
        assert_eq!(run.report.deployment_resources.len(), 1);
        assert_eq!(run.report.resources.len(), 2);
        assert!(run.report.services.is_empty());
        assert!(run.report.resources.iter().all(|r| !r.test_result.is_empty()));
    }

    #[test]
    fn failed_preparation_releases_what_was_created() {
        let fixture = Fixture::new();
        fixture
            .sim
            .fail_next("add_service_to_reservation", ApiError::new("100", "quota exceeded"));
        let err = SandboxSession::open(&fixture.env(), &fixture.config.sandboxes[0]).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
        assert!(fixture.sim.active_reservations().is_empty());
        assert!(fixture.sim.resource_names().is_empty());
        assert_eq!(fixture.sim.calls("delete_resource"), 2);
    }

    #[test]
    fn readiness_wait_reports_provisioning_errors_and_timeouts() {
        let store: Arc<dyn FileStore> = Arc::new(MemoryStore::new("ftp://x"));
        let sim = SimulatedCloudShell::new("cs", SimulatorConfig::default(), store)
            .with_setup_polls(10);
        let reservation = sim.create_reservation("slow", 10).unwrap();
        let poll = Duration::from_millis(1);
        let err = wait_reservation_ready(&sim, &reservation, poll, 3, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.code(), "SHT-2002");
        assert!(err.is_retryable());

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = wait_reservation_ready(&sim, &reservation, Duration::from_millis(1), 3, &cancel)
            .unwrap_err();
        assert_eq!(err.code(), "SHT-3101");
    }
}

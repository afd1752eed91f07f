//! Obtaining a live CloudShell: either the configured one, or a fresh
//! instance deployed from a topology, retried a bounded number of times.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{CloudShellConfig, DoConfig, MainConfig};
use crate::core::errors::{Result, ShtError};
use crate::logger::events::{RunEvent, RunLoggerHandle};
use crate::platform::{ApiConnector, CloudShellApi};
use crate::runner::cancel::CancelToken;
use crate::runner::sandbox::wait_reservation_ready;

/// Topology category holding deployable CloudShell images.
pub const CLOUDSHELL_TOPOLOGY_CATEGORY: &str = "CloudShell";

const DEPLOYED_USER: &str = "admin";
const DEPLOYED_PASSWORD: &str = "admin";
const DEPLOYED_DOMAIN: &str = "Global";

/// Reservation on the deployment host backing a freshly deployed CloudShell.
struct Deployment {
    api: Arc<dyn CloudShellApi>,
    reservation_id: String,
    delete_on_release: bool,
}

/// A CloudShell the run can use. Tears down its deployment, if any, on release.
pub struct CloudShellLease {
    api: Arc<dyn CloudShellApi>,
    attempt: u32,
    deployment: Option<Deployment>,
}

impl std::fmt::Debug for CloudShellLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudShellLease")
            .field("host", &self.api.host())
            .field("attempt", &self.attempt)
            .field(
                "deployment",
                &self.deployment.as_ref().map(|d| d.reservation_id.as_str()),
            )
            .finish()
    }
}

impl CloudShellLease {
    #[must_use]
    pub fn api(&self) -> &Arc<dyn CloudShellApi> {
        &self.api
    }

    /// 1-based attempt that produced this CloudShell.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    #[must_use]
    pub const fn is_deployed(&self) -> bool {
        self.deployment.is_some()
    }

    /// End and delete the deployment reservation when `delete_cs` is set.
    pub fn release(&mut self) -> Result<()> {
        let Some(deployment) = self.deployment.take() else {
            return Ok(());
        };
        if !deployment.delete_on_release {
            return Ok(());
        }
        teardown(deployment.api.as_ref(), &deployment.reservation_id)
    }
}

impl Drop for CloudShellLease {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            eprintln!("[SHT-PROVISION] failed to tear down CloudShell deployment: {err}");
        }
    }
}

fn teardown(api: &dyn CloudShellApi, reservation_id: &str) -> Result<()> {
    let ended = api
        .end_reservation(reservation_id)
        .map_err(|e| ShtError::platform("end_reservation", e));
    let deleted = api
        .delete_reservation(reservation_id)
        .map_err(|e| ShtError::platform("delete_reservation", e));
    ended.and(deleted)
}

// ──────────────────── provisioner ────────────────────

pub struct CloudShellProvisioner<'a> {
    config: &'a MainConfig,
    connector: &'a dyn ApiConnector,
    cancel: CancelToken,
    logger: RunLoggerHandle,
}

impl<'a> CloudShellProvisioner<'a> {
    #[must_use]
    pub fn new(
        config: &'a MainConfig,
        connector: &'a dyn ApiConnector,
        cancel: CancelToken,
        logger: RunLoggerHandle,
    ) -> Self {
        Self {
            config,
            connector,
            cancel,
            logger,
        }
    }

    /// Retry retryable failures up to `run.provision_attempts` times.
    ///
    /// When every attempt fails the last error is kept as the source of
    /// [`ShtError::CloudShellNotStarted`].
    pub fn provision(&self) -> Result<CloudShellLease> {
        let attempts = self.config.run.provision_attempts.max(1);
        let mut last: Option<ShtError> = None;

        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return Err(ShtError::Interrupted);
            }
            match self.attempt(attempt) {
                Ok(lease) => {
                    self.logger.send(RunEvent::CloudShellReady {
                        host: lease.api.host().to_string(),
                        attempt,
                    });
                    return Ok(lease);
                }
                Err(err) => {
                    self.logger.send(RunEvent::ProvisionAttempt {
                        attempt,
                        error_code: err.code().to_string(),
                        error_message: err.to_string(),
                    });
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last = Some(err);
                }
            }
        }

        Err(ShtError::CloudShellNotStarted {
            attempts,
            last: Box::new(last.unwrap_or(ShtError::Runtime {
                details: "no provisioning attempt was made".to_string(),
            })),
        })
    }

    fn attempt(&self, attempt: u32) -> Result<CloudShellLease> {
        match (&self.config.do_conf, &self.config.cloudshell) {
            (Some(do_conf), cloudshell) => self.deploy(attempt, do_conf, cloudshell.as_ref()),
            (None, Some(cloudshell)) => self.connect_existing(attempt, cloudshell),
            (None, None) => Err(ShtError::InvalidConfig {
                details: "either [cloudshell] or [do] must be configured".to_string(),
            }),
        }
    }

    fn connect_existing(&self, attempt: u32, conf: &CloudShellConfig) -> Result<CloudShellLease> {
        let api = self
            .connector
            .connect(&conf.host, &conf.user, &conf.password, &conf.domain)?;
        ensure_alive(api.as_ref())?;
        Ok(CloudShellLease {
            api,
            attempt,
            deployment: None,
        })
    }

    fn deploy(
        &self,
        attempt: u32,
        do_conf: &DoConfig,
        cloudshell: Option<&CloudShellConfig>,
    ) -> Result<CloudShellLease> {
        let do_api = self
            .connector
            .connect(&do_conf.host, &do_conf.user, &do_conf.password, &do_conf.domain)?;

        let topologies = do_api
            .get_topologies_by_category(CLOUDSHELL_TOPOLOGY_CATEGORY)
            .map_err(|e| ShtError::platform("get_topologies_by_category", e))?;
        let topology = topologies
            .iter()
            .find(|path| path.rsplit('/').next() == Some(do_conf.cs_version.as_str()))
            .ok_or_else(|| ShtError::InvalidConfig {
                details: format!(
                    "no topology named {:?} in category {CLOUDSHELL_TOPOLOGY_CATEGORY}",
                    do_conf.cs_version
                ),
            })?;

        let reservation_id = do_api
            .create_topology_reservation(
                &format!("auto tests {}", do_conf.cs_version),
                topology,
                self.config.run.reservation_duration_minutes,
                do_conf.cs_specific_version.as_deref(),
            )
            .map_err(|e| ShtError::platform("create_topology_reservation", e))?;

        match self.bring_up(do_api.as_ref(), &reservation_id, cloudshell) {
            Ok(api) => Ok(CloudShellLease {
                api,
                attempt,
                deployment: Some(Deployment {
                    api: do_api,
                    reservation_id,
                    delete_on_release: do_conf.delete_cs,
                }),
            }),
            Err(err) => {
                if let Err(teardown_err) = teardown(do_api.as_ref(), &reservation_id) {
                    self.logger.error(None, &teardown_err);
                }
                Err(err)
            }
        }
    }

    fn bring_up(
        &self,
        do_api: &dyn CloudShellApi,
        reservation_id: &str,
        cloudshell: Option<&CloudShellConfig>,
    ) -> Result<Arc<dyn CloudShellApi>> {
        let run = &self.config.run;
        wait_reservation_ready(
            do_api,
            reservation_id,
            Duration::from_millis(run.reservation_poll_interval_ms),
            run.reservation_poll_attempts,
            &self.cancel,
        )?;

        let details = do_api
            .get_reservation_details(reservation_id)
            .map_err(|e| ShtError::platform("get_reservation_details", e))?;
        let resource = details
            .resources
            .first()
            .ok_or_else(|| ShtError::ReservationNotReady {
                reservation_id: reservation_id.to_string(),
                details: "no CloudShell resource was deployed".to_string(),
            })?;
        let address = do_api
            .get_resource_details(resource)
            .map_err(|e| ShtError::platform("get_resource_details", e))?
            .address;

        if !self
            .cancel
            .sleep(Duration::from_millis(run.cloudshell_startup_wait_ms))
        {
            return Err(ShtError::Interrupted);
        }

        let (user, password, domain) = cloudshell.map_or(
            (DEPLOYED_USER, DEPLOYED_PASSWORD, DEPLOYED_DOMAIN),
            |conf| (conf.user.as_str(), conf.password.as_str(), conf.domain.as_str()),
        );
        let api = self
            .connector
            .connect_deployed(&address, user, password, domain)?;
        ensure_alive(api.as_ref())?;
        Ok(api)
    }
}

fn ensure_alive(api: &dyn CloudShellApi) -> Result<()> {
    api.is_alive().map_err(|e| ShtError::CloudShellUnreachable {
        host: api.host().to_string(),
        details: e.to_string(),
    })
}

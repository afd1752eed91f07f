//! Whole-run orchestration: provision CloudShell, install shells, then run
//! every sandbox on a bounded worker pool and aggregate the reports.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use crate::core::config::{MainConfig, SandboxConfig};
use crate::core::errors::{Result, ShtError};
use crate::logger::events::{RunEvent, RunLoggerHandle};
use crate::platform::{ApiConnector, CloudShellApi, HostCheck};
use crate::registry::Registry;
use crate::report::{Reporting, SandboxReport};
use crate::runner::cancel::CancelToken;
use crate::runner::executor::{Executor, millis};
use crate::runner::provision::CloudShellProvisioner;
use crate::runner::reporter::ReporterKind;
use crate::runner::sandbox::{SandboxRun, SandboxSession, SessionEnv};
use crate::transport::FileStore;

/// What a finished (or interrupted) run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub reporting: Reporting,
    /// Sandboxes whose worker failed outright, folded into one error.
    pub failure: Option<ShtError>,
    pub cancelled: bool,
}

impl RunOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && !self.cancelled && self.reporting.is_success()
    }

    /// Worker failures first, then cancellation, else the report.
    pub fn into_result(self) -> Result<Reporting> {
        if let Some(err) = self.failure {
            return Err(err);
        }
        if self.cancelled {
            return Err(ShtError::Interrupted);
        }
        Ok(self.reporting)
    }
}

pub struct Orchestrator<'a> {
    config: &'a MainConfig,
    connector: &'a dyn ApiConnector,
    hosts: Option<&'a dyn HostCheck>,
    store: Arc<dyn FileStore>,
    registry: Registry,
    cancel: CancelToken,
    logger: RunLoggerHandle,
    reporter: Option<ReporterKind>,
}

impl<'a> Orchestrator<'a> {
    #[must_use]
    pub fn new(
        config: &'a MainConfig,
        connector: &'a dyn ApiConnector,
        store: Arc<dyn FileStore>,
        cancel: CancelToken,
        logger: RunLoggerHandle,
    ) -> Self {
        Self {
            config,
            connector,
            hosts: None,
            store,
            registry: Registry::standard(),
            cancel,
            logger,
            reporter: None,
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Check every lab host before provisioning anything.
    #[must_use]
    pub fn with_host_check(mut self, hosts: &'a dyn HostCheck) -> Self {
        self.hosts = Some(hosts);
        self
    }

    /// Force a reporter instead of detecting one from the environment.
    #[must_use]
    pub const fn with_reporter(mut self, reporter: ReporterKind) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Request a cooperative stop of the whole run.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Provision, install shells and run every sandbox.
    ///
    /// `Err` means the run never reached the sandboxes; per-sandbox failures
    /// are reported through [`RunOutcome::failure`] next to the partial report.
    pub fn run(&self) -> Result<RunOutcome> {
        let started = Instant::now();
        self.logger.send(RunEvent::RunStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.config.stable_hash()?,
            sandboxes: self.config.sandboxes.len(),
        });

        let outcome = self.check_hosts().and_then(|()| self.provision_and_run());
        let success = outcome.as_ref().is_ok_and(RunOutcome::is_success);
        if let Err(err) = &outcome {
            self.logger.error(None, err);
        }
        self.logger.send(RunEvent::RunFinished {
            success,
            duration_ms: millis(started.elapsed()),
        });
        outcome
    }

    fn check_hosts(&self) -> Result<()> {
        let Some(hosts) = self.hosts else {
            return Ok(());
        };
        for (name, host) in self.config.liveness_targets() {
            if !hosts.is_host_alive(&host) {
                return Err(ShtError::HostNotAlive { name, host });
            }
        }
        Ok(())
    }

    fn provision_and_run(&self) -> Result<RunOutcome> {
        let mut lease = CloudShellProvisioner::new(
            self.config,
            self.connector,
            self.cancel.clone(),
            self.logger.clone(),
        )
        .provision()?;
        let api = Arc::clone(lease.api());

        let outcome = self
            .install_shells(api.as_ref())
            .map(|models| self.run_sandboxes(api, &models));

        if let Err(err) = lease.release() {
            self.logger.error(None, &err);
        }
        outcome
    }

    /// Install every configured shell; returns shell name -> model name.
    fn install_shells(&self, api: &dyn CloudShellApi) -> Result<HashMap<String, String>> {
        let mut models = HashMap::with_capacity(self.config.shells.len());
        for shell in &self.config.shells {
            if self.cancel.is_cancelled() {
                return Err(ShtError::Interrupted);
            }
            let model = api
                .install_shell(&shell.path)
                .map_err(|e| ShtError::platform("install_shell", e))?;
            self.logger.send(RunEvent::ShellInstalled {
                shell: shell.name.clone(),
                path: shell.path.clone(),
            });
            models.insert(shell.name.clone(), model);
        }
        Ok(models)
    }

    // ──────────────────── worker pool ────────────────────

    fn run_sandboxes(
        &self,
        api: Arc<dyn CloudShellApi>,
        models: &HashMap<String, String>,
    ) -> RunOutcome {
        let env = SessionEnv {
            config: self.config,
            models,
            api,
            store: Arc::clone(&self.store),
            cancel: self.cancel.clone(),
            logger: self.logger.clone(),
        };
        let reporting = Mutex::new(Reporting::default());
        let failures: Mutex<Vec<(String, ShtError)>> = Mutex::new(Vec::new());

        let (job_tx, job_rx) = unbounded::<&SandboxConfig>();
        for sandbox in &self.config.sandboxes {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(sandbox);
        }
        drop(job_tx);

        let workers = self.config.run.pool_size.clamp(1, self.config.sandboxes.len().max(1));
        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let env = &env;
                let reporting = &reporting;
                let failures = &failures;
                scope.spawn(move || {
                    while let Ok(sandbox) = job_rx.recv() {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let started = Instant::now();
                        let SandboxRun { mut report, error } = self.run_sandbox(env, sandbox);
                        if let Some(err) = error {
                            self.logger.error(Some(&sandbox.name), &err);
                            report = report.with_failure(err.to_string());
                            if !matches!(err, ShtError::Interrupted) {
                                // Siblings wind down; the error is re-raised after they drain.
                                self.cancel.cancel();
                                failures.lock().push((sandbox.name.clone(), err));
                            }
                        }
                        self.logger.send(RunEvent::SandboxFinished {
                            sandbox: sandbox.name.clone(),
                            success: report.is_success(),
                            duration_ms: millis(started.elapsed()),
                        });
                        reporting.lock().add(report);
                    }
                });
            }
        });

        RunOutcome {
            reporting: reporting.into_inner(),
            failure: ShtError::from_worker_failures(failures.into_inner()),
            cancelled: self.cancel.is_cancelled(),
        }
    }

    fn run_sandbox(&self, env: &SessionEnv<'_>, sandbox: &SandboxConfig) -> SandboxRun {
        let mut session = match SandboxSession::open(env, sandbox) {
            Ok(session) => session,
            Err(err) => {
                return SandboxRun {
                    report: SandboxReport::new(sandbox.name.as_str()),
                    error: Some(err),
                };
            }
        };
        let mut executor = Executor::new(self.cancel.clone(), self.logger.clone())
            .with_sandbox(sandbox.name.as_str());
        if let Some(kind) = self.reporter {
            executor = executor.with_reporter(kind);
        }

        let mut run = session.run_tests(&self.registry, &executor);
        if let Err(err) = session.release() {
            run.report = run
                .report
                .with_failure(format!("failed to release the sandbox: {err}"));
        }
        run
    }
}

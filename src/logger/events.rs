//! Run event logger: a dedicated thread owns the [`JsonlWriter`] and the
//! optional console echo. Workers send [`RunEvent`]s through a bounded
//! crossbeam channel; `try_send()` keeps a slow disk from stalling a sandbox.

#![allow(missing_docs)]

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::config::LoggingConfig;
use crate::core::errors::{Result, ShtError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── public event type ────────────────────

#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        version: String,
        config_hash: String,
        sandboxes: usize,
    },
    RunFinished {
        success: bool,
        duration_ms: u64,
    },
    ShellInstalled {
        shell: String,
        path: String,
    },
    ProvisionAttempt {
        attempt: u32,
        error_code: String,
        error_message: String,
    },
    CloudShellReady {
        host: String,
        attempt: u32,
    },
    ReservationCreated {
        sandbox: String,
        reservation_id: String,
    },
    ReservationReleased {
        sandbox: String,
        reservation_id: String,
        ok: bool,
        details: Option<String>,
    },
    TargetPrepared {
        sandbox: String,
        target: String,
        details: String,
    },
    SuiteStarted {
        sandbox: String,
        target: String,
        cases: usize,
    },
    SuiteFinished {
        sandbox: String,
        target: String,
        success: bool,
        duration_ms: u64,
    },
    CaseFinished {
        sandbox: String,
        target: String,
        case: String,
        status: String,
        duration_ms: u64,
        details: Option<String>,
    },
    SandboxFinished {
        sandbox: String,
        success: bool,
        duration_ms: u64,
    },
    Error {
        sandbox: Option<String>,
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

// ──────────────────── public handle ────────────────────

/// Cloneable handle shared by every worker.
#[derive(Clone)]
pub struct RunLoggerHandle {
    tx: Sender<RunEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl RunLoggerHandle {
    /// Non-blocking send; a full channel drops the event and bumps the counter.
    pub fn send(&self, event: RunEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Log an error together with its `SHT-xxxx` code.
    pub fn error(&self, sandbox: Option<&str>, err: &ShtError) {
        self.send(RunEvent::Error {
            sandbox: sandbox.map(str::to_string),
            code: err.code().to_string(),
            message: err.to_string(),
        });
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(RunEvent::Shutdown);
    }

    /// Handle whose events go nowhere; used where no logger thread is running.
    #[must_use]
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

// ──────────────────── configuration ────────────────────

pub struct RunLoggerConfig {
    /// `None` disables the JSONL file entirely.
    pub jsonl_config: Option<JsonlConfig>,
    /// Echo each event to stderr as `[SHT] ...`.
    pub console: bool,
    pub channel_capacity: usize,
}

impl Default for RunLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: None,
            console: false,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl RunLoggerConfig {
    #[must_use]
    pub fn from_logging(logging: &LoggingConfig) -> Self {
        let jsonl_config = logging.jsonl_path.as_ref().map(|path| JsonlConfig {
            path: path.clone(),
            fallback_path: logging.fallback_path.clone(),
            max_size_bytes: logging.max_size_bytes,
            max_rotated_files: logging.max_rotated_files,
            ..JsonlConfig::default()
        });
        Self {
            jsonl_config,
            console: logging.console,
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread. It exits on `shutdown()` or when every handle is dropped.
pub fn spawn_logger(config: RunLoggerConfig) -> Result<(RunLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<RunEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = RunLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("sht-logger".to_string())
        .spawn(move || {
            logger_thread_main(&rx, config.jsonl_config, config.console, &dropped_clone);
        })
        .map_err(|e| ShtError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

// ──────────────────── logger thread ────────────────────

fn logger_thread_main(
    rx: &Receiver<RunEvent>,
    jsonl_config: Option<JsonlConfig>,
    console: bool,
    dropped: &AtomicU64,
) {
    let mut jsonl = jsonl_config.map(JsonlWriter::open);

    let mut emit = |entry: &LogEntry| {
        if let Some(writer) = jsonl.as_mut() {
            writer.write_entry(entry);
        }
        if console {
            let _ = writeln!(io::stderr(), "[SHT] {}", entry.summary());
        }
    };

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            emit(&warn);
        }

        if matches!(event, RunEvent::Shutdown) {
            break;
        }
        emit(&event_to_log_entry(&event));
    }

    if let Some(writer) = jsonl.as_mut() {
        writer.flush();
        writer.fsync();
    }
}

// ──────────────────── event conversion ────────────────────

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &RunEvent) -> LogEntry {
    match event {
        RunEvent::RunStarted {
            version,
            config_hash,
            sandboxes,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.details = Some(format!(
                "version={version} config_hash={config_hash} sandboxes={sandboxes}"
            ));
            e
        }
        RunEvent::RunFinished {
            success,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RunFinish, Severity::Info);
            e.ok = Some(*success);
            e.duration_ms = Some(*duration_ms);
            e
        }
        RunEvent::ShellInstalled { shell, path } => {
            let mut e = LogEntry::new(EventType::ShellInstall, Severity::Info);
            e.target = Some(shell.clone());
            e.details = Some(path.clone());
            e.ok = Some(true);
            e
        }
        RunEvent::ProvisionAttempt {
            attempt,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::ProvisionAttempt, Severity::Warning);
            e.attempt = Some(*attempt);
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        RunEvent::CloudShellReady { host, attempt } => {
            let mut e = LogEntry::new(EventType::CloudshellReady, Severity::Info);
            e.attempt = Some(*attempt);
            e.details = Some(format!("host={host}"));
            e.ok = Some(true);
            e
        }
        RunEvent::ReservationCreated {
            sandbox,
            reservation_id,
        } => {
            let mut e = LogEntry::new(EventType::ReservationCreate, Severity::Info);
            e.sandbox = Some(sandbox.clone());
            e.reservation_id = Some(reservation_id.clone());
            e
        }
        RunEvent::ReservationReleased {
            sandbox,
            reservation_id,
            ok,
            details,
        } => {
            let severity = if *ok { Severity::Info } else { Severity::Warning };
            let mut e = LogEntry::new(EventType::ReservationRelease, severity);
            e.sandbox = Some(sandbox.clone());
            e.reservation_id = Some(reservation_id.clone());
            e.ok = Some(*ok);
            e.details.clone_from(details);
            e
        }
        RunEvent::TargetPrepared {
            sandbox,
            target,
            details,
        } => {
            let mut e = LogEntry::new(EventType::TargetPrepare, Severity::Debug);
            e.sandbox = Some(sandbox.clone());
            e.target = Some(target.clone());
            e.details = Some(details.clone());
            e
        }
        RunEvent::SuiteStarted {
            sandbox,
            target,
            cases,
        } => {
            let mut e = LogEntry::new(EventType::SuiteStart, Severity::Info);
            e.sandbox = Some(sandbox.clone());
            e.target = Some(target.clone());
            e.details = Some(format!("cases={cases}"));
            e
        }
        RunEvent::SuiteFinished {
            sandbox,
            target,
            success,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::SuiteFinish, Severity::Info);
            e.sandbox = Some(sandbox.clone());
            e.target = Some(target.clone());
            e.ok = Some(*success);
            e.duration_ms = Some(*duration_ms);
            e
        }
        RunEvent::CaseFinished {
            sandbox,
            target,
            case,
            status,
            duration_ms,
            details,
        } => {
            let severity = if matches!(status.as_str(), "failed" | "error") {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::CaseFinish, severity);
            e.sandbox = Some(sandbox.clone());
            e.target = Some(target.clone());
            e.case = Some(case.clone());
            e.status = Some(status.clone());
            e.duration_ms = Some(*duration_ms);
            e.details.clone_from(details);
            e
        }
        RunEvent::SandboxFinished {
            sandbox,
            success,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::SandboxFinish, Severity::Info);
            e.sandbox = Some(sandbox.clone());
            e.ok = Some(*success);
            e.duration_ms = Some(*duration_ms);
            e
        }
        RunEvent::Error {
            sandbox,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Error);
            e.sandbox.clone_from(sandbox);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        RunEvent::Shutdown => LogEntry::new(EventType::RunFinish, Severity::Info),
    }
}

// ──────────────────── tests ────────────────────

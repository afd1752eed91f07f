//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

use shell_tests::core::config::MainConfig;
use shell_tests::core::errors::ShtError;
use shell_tests::logger::events::{RunLoggerConfig, spawn_logger};
use shell_tests::platform::simulated::SimulatedConnector;
use shell_tests::registry::Registry;
use shell_tests::runner::signals::register_cancel_signals;
use shell_tests::runner::{CancelToken, Orchestrator, RunOutcome};
use shell_tests::target::{DeviceAvailability, Family};
use shell_tests::transport::open_store;

/// Shell tests: run automation test suites for CloudShell shells.
#[derive(Debug, Parser)]
#[command(
    name = "shell-tests",
    author,
    version,
    about = "Automation tests for CloudShell shells",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Echo run events to stderr.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Provision sandboxes and run the test suites.
    RunTests(ConfigArgs),
    /// Load and validate a test configuration without running anything.
    Validate(ConfigArgs),
    /// Show the family / availability / command dispatch table.
    Registry(RegistryArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
    /// Show version and optional build metadata.
    Version(VersionArgs),
}

#[derive(Debug, Clone, Args, Serialize)]
struct ConfigArgs {
    /// Test configuration file.
    #[arg(value_name = "TEST_CONF")]
    test_conf: PathBuf,
    /// Environment overlay merged on top of the test configuration.
    #[arg(long, value_name = "PATH")]
    env_conf: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct RegistryArgs {
    /// Only show one family (e.g. `CS_Router` or `router`).
    #[arg(long, value_name = "FAMILY")]
    family: Option<String>,
    /// Only show one device availability (`real_device`, `simulator`, `without_device`).
    #[arg(long, value_name = "AVAILABILITY")]
    availability: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Args, Serialize, Default)]
struct VersionArgs {
    /// Include additional build metadata fields.
    #[arg(long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Run completed but some tests failed.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<ShtError> for CliError {
    fn from(err: ShtError) -> Self {
        if err.is_config_error() {
            Self::User(err.to_string())
        } else if matches!(err, ShtError::Serialization { .. }) {
            Self::Internal(err.to_string())
        } else {
            Self::Runtime(format_error_chain(&err))
        }
    }
}

/// `err` followed by each `caused by:` source.
fn format_error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str("\n  caused by: ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::RunTests(args) => run_tests(cli, args),
        Command::Validate(args) => run_validate(cli, args),
        Command::Registry(args) => run_registry(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
        Command::Version(args) => emit_version(cli, args),
    }
}

// ──────────────────── run-tests ────────────────────

fn load_config(args: &ConfigArgs) -> Result<MainConfig, CliError> {
    Ok(MainConfig::load(&args.test_conf, args.env_conf.as_deref())?)
}

fn run_tests(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let mode = output_mode(cli);
    let config = load_config(args)?;

    let mut logger_config = RunLoggerConfig::from_logging(&config.logging);
    if cli.verbose {
        logger_config.console = true;
    } else if cli.quiet {
        logger_config.console = false;
    }
    let (logger, logger_thread) = spawn_logger(logger_config)?;

    let cancel = CancelToken::new();
    register_cancel_signals(&cancel);

    let store = open_store(&config.effective_store())?;
    let connector = SimulatedConnector::new(config.simulator.clone(), store.clone());
    let result = Orchestrator::new(&config, &connector, store, cancel, logger.clone())
        .with_host_check(&connector)
        .run();

    logger.shutdown();
    if logger_thread.join().is_err() {
        eprintln!("[SHT-JSONL] logger thread panicked; run log may be incomplete");
    }
    let dropped = logger.dropped_events();
    if dropped > 0 && !cli.quiet {
        eprintln!("[SHT-JSONL] {dropped} run events were dropped");
    }

    let outcome = result?;
    emit_outcome(cli, mode, &outcome)?;

    let RunOutcome {
        reporting,
        failure,
        cancelled,
    } = outcome;
    if let Some(err) = failure {
        return Err(err.into());
    }
    if cancelled {
        return Err(ShtError::Interrupted.into());
    }
    if reporting.is_success() {
        Ok(())
    } else {
        Err(CliError::Partial("some tests failed".to_string()))
    }
}

fn emit_outcome(cli: &Cli, mode: OutputMode, outcome: &RunOutcome) -> Result<(), CliError> {
    let success = outcome.is_success();
    match mode {
        OutputMode::Human => {
            if cli.quiet && success {
                return Ok(());
            }
            let verdict = if success {
                "successful".green().bold()
            } else {
                "unsuccessful".red().bold()
            };
            println!("Tests were {verdict}");
            println!("Test results:");
            println!("{}", outcome.reporting.render_text());
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "run-tests",
                "success": success,
                "cancelled": outcome.cancelled,
                "failure": outcome.failure.as_ref().map(|err| json!({
                    "code": err.code(),
                    "message": err.to_string(),
                })),
                "report": serde_json::to_value(&outcome.reporting)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── validate ────────────────────

fn run_validate(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    let config = load_config(args)?;
    let hash = config.stable_hash()?;
    let mode = if config.do_conf.is_some() {
        "deploy"
    } else {
        "existing"
    };
    let targets =
        config.resources.len() + config.services.len() + config.deployment_resources.len();

    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            println!("{} {}", "valid".green().bold(), args.test_conf.display());
            println!("cloudshell: {mode}");
            println!("shells: {}", config.shells.len());
            println!("targets: {targets}");
            println!("sandboxes: {}", config.sandboxes.len());
            println!("pool_size: {}", config.run.pool_size);
            println!("config_hash: {hash}");
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "validate",
                "valid": true,
                "cloudshell": mode,
                "shells": config.shells.len(),
                "targets": targets,
                "sandboxes": config.sandboxes.len(),
                "pool_size": config.run.pool_size,
                "config_hash": hash,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

// ──────────────────── registry ────────────────────

fn run_registry(cli: &Cli, args: &RegistryArgs) -> Result<(), CliError> {
    let family = args
        .family
        .as_deref()
        .map(str::parse::<Family>)
        .transpose()
        .map_err(|e| CliError::User(e.to_string()))?;
    let availability = args
        .availability
        .as_deref()
        .map(str::parse::<DeviceAvailability>)
        .transpose()
        .map_err(|e| CliError::User(e.to_string()))?;

    let registry = Registry::standard();
    let rows: Vec<_> = registry
        .rows()
        .into_iter()
        .filter(|(f, _, _, _)| family.is_none_or(|want| want == *f))
        .filter(|(_, a, _, _)| availability.is_none_or(|want| want == *a))
        .collect();

    match output_mode(cli) {
        OutputMode::Human => {
            let mut stdout = io::stdout().lock();
            let mut last_group = None;
            for (f, a, command, kind) in &rows {
                if last_group != Some((*f, *a)) {
                    writeln!(stdout, "{} / {}", f.as_str().bold(), a)?;
                    last_group = Some((*f, *a));
                }
                writeln!(stdout, "  {command:<28} {kind}")?;
            }
        }
        OutputMode::Json => {
            let entries: Vec<Value> = rows
                .iter()
                .map(|(f, a, command, kind)| {
                    json!({
                        "family": f.as_str(),
                        "availability": a,
                        "command": command,
                        "case": kind.name(),
                        "methods": kind.methods(),
                    })
                })
                .collect();
            write_json_line(&json!({ "command": "registry", "rows": entries }))?;
        }
    }
    Ok(())
}

// ──────────────────── version / output ────────────────────

fn emit_version(cli: &Cli, args: &VersionArgs) -> Result<(), CliError> {
    let version = env!("CARGO_PKG_VERSION");
    let package = env!("CARGO_PKG_NAME");
    let target = option_env!("TARGET").unwrap_or("unknown");
    let profile = option_env!("PROFILE").unwrap_or("unknown");
    let git_sha = option_env!("VERGEN_GIT_SHA")
        .or(option_env!("GIT_SHA"))
        .unwrap_or("unknown");

    match output_mode(cli) {
        OutputMode::Human => {
            println!("shell-tests {version}");
            if args.verbose {
                println!("package: {package}");
                println!("target: {target}");
                println!("profile: {profile}");
                println!("git_sha: {git_sha}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "binary": "shell-tests",
                "version": version,
                "package": package,
                "build": {
                    "target": target,
                    "profile": profile,
                    "git_sha": git_sha,
                }
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("SHT_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_before_and_after_subcommand() {
        let before = Cli::try_parse_from([
            "shell-tests",
            "--json",
            "--no-color",
            "-v",
            "run-tests",
            "t.toml",
        ]);
        assert!(before.is_ok());

        let after = Cli::try_parse_from(["shell-tests", "run-tests", "t.toml", "--json", "-q"]);
        assert!(after.is_ok());
    }

    #[test]
    fn parses_every_subcommand() {
        let cases = [
            vec!["shell-tests", "run-tests", "tests.toml", "--env-conf", "env.toml"],
            vec!["shell-tests", "validate", "tests.toml"],
            vec![
                "shell-tests",
                "registry",
                "--family",
                "CS_Router",
                "--availability",
                "without_device",
            ],
            vec!["shell-tests", "completions", "bash"],
            vec!["shell-tests", "version", "--verbose"],
        ];
        for case in cases {
            let parsed = Cli::try_parse_from(case.clone());
            assert!(parsed.is_ok(), "failed to parse case: {case:?}");
        }
    }

    #[test]
    fn run_tests_requires_a_config_path() {
        assert!(Cli::try_parse_from(["shell-tests", "run-tests"]).is_err());
        assert!(Cli::try_parse_from(["shell-tests", "-v", "-q", "validate", "t.toml"]).is_err());
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(resolve_output_mode(true, Some("human"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("json"), true), OutputMode::Json);
        assert_eq!(resolve_output_mode(false, Some("human"), false), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, Some("auto"), true), OutputMode::Human);
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn errors_map_to_exit_codes() {
        let config: CliError = ShtError::InvalidConfig {
            details: "x".to_string(),
        }
        .into();
        assert_eq!(config.exit_code(), 1);
        assert_eq!(CliError::from(ShtError::Interrupted).exit_code(), 2);
        assert_eq!(CliError::Partial("failed".to_string()).exit_code(), 4);
    }

    #[test]
    fn error_chain_includes_sources() {
        let err = ShtError::CloudShellNotStarted {
            attempts: 5,
            last: Box::new(ShtError::CloudShellUnreachable {
                host: "10.1.1.10".to_string(),
                details: "dead".to_string(),
            }),
        };
        let rendered = CliError::from(err).to_string();
        assert!(rendered.contains("SHT-2004"));
        assert!(rendered.contains("caused by: [SHT-2003]"));
    }
}

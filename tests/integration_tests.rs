//! Integration tests: CLI smoke tests and full runs against the simulated
//! CloudShell shipped in `demos/sample.toml`.

mod common;

use std::fs;

use serde_json::Value;

fn sample() -> String {
    common::demo_path("sample.toml").display().to_string()
}

fn parse_json(stdout: &str, log: &std::path::Path) -> Value {
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|e| panic!("stdout is not JSON ({e}); log: {}", log.display()))
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: shell-tests [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("shell-tests"),
        "missing version output; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_flags_work() {
    for subcommand in ["run-tests", "validate", "registry", "completions", "version"] {
        let result = common::run_cli_case(
            &format!("subcommand_help_{subcommand}"),
            &[subcommand, "--help"],
        );
        assert!(
            result.status.success(),
            "{subcommand} --help failed; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn completions_mention_binary_name() {
    let result = common::run_cli_case("completions_bash", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("shell-tests"));
}

#[test]
fn validate_accepts_sample_config() {
    let sample = sample();
    let result = common::run_cli_case("validate_sample", &["--json", "validate", &sample]);
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let payload = parse_json(&result.stdout, &result.log_path);
    assert_eq!(payload["valid"], true);
    assert_eq!(payload["sandboxes"], 2);
    assert_eq!(payload["targets"], 4);
}

#[test]
fn validate_missing_file_is_a_user_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml").display().to_string();
    let result = common::run_cli_case("validate_missing", &["validate", &missing]);
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("SHT-1002"), "log: {}", result.log_path.display());
}

#[test]
fn validate_rejects_unknown_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    let raw = fs::read_to_string(common::demo_path("sample.toml"))
        .unwrap()
        .replace("backend = \"simulated\"", "backend = \"rest\"");
    fs::write(&path, raw).unwrap();

    let result = common::run_cli_case(
        "validate_unknown_backend",
        &["validate", &path.display().to_string()],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("SHT-1001"));
}

#[test]
fn registry_lists_router_connectivity_for_real_devices_only() {
    let result = common::run_cli_case(
        "registry_router",
        &["--json", "registry", "--family", "router"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let payload = parse_json(&result.stdout, &result.log_path);
    let rows = payload["rows"].as_array().unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|row| row["family"] == "CS_Router"));
    let connectivity: Vec<&Value> = rows
        .iter()
        .filter(|row| row["command"] == "applyconnectivitychanges")
        .collect();
    assert_eq!(connectivity.len(), 1);
    assert_eq!(connectivity[0]["availability"], "real_device");
    assert_eq!(connectivity[0]["case"], "Connectivity");
}

#[test]
fn registry_rejects_unknown_family() {
    let result = common::run_cli_case("registry_unknown", &["registry", "--family", "CS_Toaster"]);
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
}

#[test]
fn sample_run_passes_and_reports_every_target() {
    let sample = sample();
    let result = common::run_cli_case("sample_run_json", &["--json", "run-tests", &sample]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );

    let payload = parse_json(&result.stdout, &result.log_path);
    assert_eq!(payload["success"], true);
    assert_eq!(payload["cancelled"], false);
    assert!(payload["failure"].is_null());

    let sandboxes = payload["report"]["sandboxes"].as_array().unwrap();
    assert_eq!(sandboxes.len(), 2);
    let physical = sandboxes
        .iter()
        .find(|s| s["name"] == "physical")
        .expect("physical sandbox reported");
    assert_eq!(physical["resources"].as_array().unwrap().len(), 2);
    assert_eq!(physical["services"].as_array().unwrap().len(), 1);
    let virtual_sandbox = sandboxes
        .iter()
        .find(|s| s["name"] == "virtual")
        .expect("virtual sandbox reported");
    assert_eq!(
        virtual_sandbox["deployment_resources"][0]["name"],
        "virtual-router"
    );
}

#[test]
fn sample_run_human_output_has_report_tree() {
    let sample = sample();
    let result = common::run_cli_case_with_env(
        "sample_run_human",
        &["--no-color", "run-tests", &sample],
        &[("SHT_OUTPUT_FORMAT", "human")],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("Test results:"));
    assert!(result.stdout.contains("Sandbox name: physical\nTests for sandbox was successful"));
    assert!(result.stdout.contains(
        "Resource name: router-real, IP: 10.0.0.1, Type: Real device, Family: CS_Router\n\
         Test for device was successful"
    ));
    assert!(result.stdout.contains("Service name: traffic-controller, Type: Without device"));
    assert!(result.stdout.contains("connectivity (Connectivity.connectivity-router-real) ... ok"));
}

#[test]
fn unexpected_pass_fails_the_run_with_partial_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("failing.toml");
    let raw = fs::read_to_string(common::demo_path("sample.toml"))
        .unwrap()
        .replace(
            "name = \"router-offline\"\nshell_name = \"cisco_ios\"\n",
            "name = \"router-offline\"\nshell_name = \"cisco_ios\"\n\n\
             [resources.tests.expected_failures]\n\
             \"AutoloadWithoutDevice.structure\" = \"firmware mismatch\"\n",
        );
    fs::write(&path, raw).unwrap();

    let result = common::run_cli_case(
        "unexpected_pass",
        &["--json", "run-tests", &path.display().to_string()],
    );
    assert_eq!(result.status.code(), Some(4), "log: {}", result.log_path.display());

    let payload = parse_json(&result.stdout, &result.log_path);
    assert_eq!(payload["success"], false);
    let physical = payload["report"]["sandboxes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "physical")
        .cloned()
        .unwrap();
    let offline = physical["resources"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "router-offline")
        .cloned()
        .unwrap();
    assert_eq!(offline["is_success"], false);
    assert!(offline["test_result"].as_str().unwrap().contains("but the case passed"));
}

#[test]
fn env_overlay_and_run_log_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let overlay = dir.path().join("env.toml");
    fs::write(&overlay, "[run]\npool_size = 1\n").unwrap();
    let log = dir.path().join("run.jsonl");
    let log_str = log.display().to_string();

    let sample = sample();
    let result = common::run_cli_case_with_env(
        "env_overlay_and_log",
        &[
            "--json",
            "run-tests",
            &sample,
            "--env-conf",
            &overlay.display().to_string(),
        ],
        &[("SHT_LOGGING_JSONL_PATH", log_str.as_str())],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());

    let contents = fs::read_to_string(&log).expect("run log written");
    let events: Vec<Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("each line is JSON"))
        .collect();
    assert_eq!(events.first().unwrap()["event"], "run_start");
    assert!(events.iter().any(|e| e["event"] == "run_finish"));
    assert!(events.iter().any(|e| e["event"] == "reservation_release"));
    assert_eq!(
        events.iter().filter(|e| e["event"] == "sandbox_finish").count(),
        2
    );
}

#[test]
fn unparsable_env_override_is_a_user_error() {
    let sample = sample();
    let result = common::run_cli_case_with_env(
        "bad_env_override",
        &["validate", &sample],
        &[("SHT_RUN_POOL_SIZE", "many")],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("SHT-1003"));
}

#[test]
fn unreachable_device_fails_before_provisioning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dead-device.toml");
    let raw = fs::read_to_string(common::demo_path("sample.toml")).unwrap();
    fs::write(
        &path,
        format!("[simulator]\nunreachable_hosts = [\"10.0.0.1\"]\n\n{raw}"),
    )
    .unwrap();
    let log = dir.path().join("run.jsonl");
    let log_str = log.display().to_string();

    let result = common::run_cli_case_with_env(
        "unreachable_device",
        &["run-tests", &path.display().to_string()],
        &[("SHT_LOGGING_JSONL_PATH", log_str.as_str())],
    );
    assert_eq!(result.status.code(), Some(2), "log: {}", result.log_path.display());
    assert!(
        result.stderr.contains("[SHT-2005] router-real (10.0.0.1) is not alive, check it"),
        "log: {}",
        result.log_path.display()
    );

    let contents = fs::read_to_string(&log).expect("run log written");
    let events: Vec<String> = contents
        .lines()
        .map(|line| {
            let event: Value = serde_json::from_str(line).expect("each line is JSON");
            event["event"].as_str().unwrap_or_default().to_string()
        })
        .collect();
    assert_eq!(events.first().map(String::as_str), Some("run_start"));
    assert!(events.iter().any(|e| e == "run_finish"));
    assert!(!events.iter().any(|e| e == "shell_install" || e == "reservation_create"));
}

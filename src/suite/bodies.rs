//! Case bodies: one function per `(kind, method)`.

#![allow(missing_docs)]

use regex::Regex;

use crate::core::errors::{Result, ShtError};
use crate::platform::api::{CommandParams, ResourceInfo};
use crate::platform::simulated::{DUT_ADDRESS, DUT_MODEL};
use crate::registry::TestCaseKind;
use crate::suite::CaseContext;
use crate::suite::case::{CONNECTION_ERROR_PATTERN, CaseFailure, CaseResult};
use crate::target::TargetHandle;

const DEFAULT_CUSTOM_COMMAND: &str = "show version";
const PORT_FAMILY: &str = "CS_Port";
const TRAFFIC_GENERATOR_PORT_FAMILY: &str = "CS_TrafficGeneratorPort";
const VIRTUAL_TRAFFIC_GENERATOR_PORT_FAMILY: &str = "CS_VirtualTrafficGeneratorPort";

pub fn run(kind: TestCaseKind, method: &str, ctx: &CaseContext) -> CaseResult {
    use TestCaseKind as K;
    let target = ctx.target.as_ref();
    match kind {
        K::AutoloadNetworkDevices => autoload_with_ports(target, PORT_FAMILY),
        K::AutoloadTrafficGeneratorDevices => {
            autoload_with_ports(target, TRAFFIC_GENERATOR_PORT_FAMILY)
        }
        K::AutoloadVirtualTrafficGeneratorDevices => {
            let structure = target.details()?.structure();
            ensure_contains(&structure, VIRTUAL_TRAFFIC_GENERATOR_PORT_FAMILY)
        }
        K::AutoloadWithoutPorts => Ok(target.autoload()?),
        K::AutoloadWithoutDevice => expect_connection_error(target.autoload()),

        K::RunCustomCommand => non_empty(custom_command(target, method)?),
        K::RunCustomCommandWithoutDevice => expect_connection_error(custom_command(target, method)),

        K::SaveConfig => save_config(ctx, method),
        K::SaveConfigWithoutDevice => save_config_without_device(ctx, method),
        K::RestoreConfig => restore_config(ctx, method),
        K::RestoreConfigWithoutDevice => {
            let (configuration_type, restore_method) = restore_variant(method)?;
            let path = format!("{}/test_conf", store_root(ctx));
            expect_connection_error(target.restore(&path, configuration_type, restore_method))
        }

        K::Connectivity => connectivity(target),

        K::LoadConfig => {
            ensure_related_autoloaded(ctx)?;
            let location = required_param(target, "load_config", "config_file_location")?;
            let extra = extra_params(target, "load_config", "config_file_location");
            target.load_config(&location, &extra)?;
            Ok(())
        }
        K::LoadConfigWithoutDevice => {
            let location = param(target, "load_config", "config_file_location")
                .unwrap_or_else(|| format!("{}/test_conf", store_root(ctx)));
            expect_connection_error(target.load_config(
                &location,
                &extra_params(target, "load_config", "config_file_location"),
            ))
        }
        K::StartTraffic => {
            ensure_related_autoloaded(ctx)?;
            target.start_traffic(&target.descriptor().tests.params_for("start_traffic"))?;
            Ok(())
        }
        K::StartTrafficWithoutDevice => expect_connection_error(
            target.start_traffic(&target.descriptor().tests.params_for("start_traffic")),
        ),
        K::StopTraffic => {
            ensure_related_autoloaded(ctx)?;
            target.stop_traffic(&target.descriptor().tests.params_for("stop_traffic"))?;
            Ok(())
        }
        K::StopTrafficWithoutDevice => expect_connection_error(
            target.stop_traffic(&target.descriptor().tests.params_for("stop_traffic")),
        ),
        K::GetStatistics => {
            ensure_related_autoloaded(ctx)?;
            let params = target.descriptor().tests.params_for("get_statistics");
            non_empty(target.get_statistics(&params)?)
        }
        K::GetStatisticsWithoutDevice => expect_connection_error(
            target.get_statistics(&target.descriptor().tests.params_for("get_statistics")),
        ),
        K::GetTestFile => {
            ensure_related_autoloaded(ctx)?;
            let test_name = required_param(target, "get_test_file", "test_name")?;
            non_empty(target.get_test_file(&test_name)?)
        }
        K::GetTestFileWithoutDevice => {
            let test_name =
                param(target, "get_test_file", "test_name").unwrap_or_else(|| "test".to_string());
            expect_connection_error(target.get_test_file(&test_name))
        }
    }
}

// ──────────────────── assertions ────────────────────

fn expect_connection_error<T>(result: Result<T>) -> CaseResult {
    let pattern = Regex::new(CONNECTION_ERROR_PATTERN).map_err(|err| ShtError::Runtime {
        details: format!("connection error pattern: {err}"),
    })?;
    match result {
        Ok(_) => Err(CaseFailure::assertion(format!(
            "expected an error matching {CONNECTION_ERROR_PATTERN:?} but the call succeeded"
        ))),
        Err(err) if pattern.is_match(&err.to_string()) => Ok(()),
        Err(err) => Err(CaseFailure::assertion(format!(
            "expected an error matching {CONNECTION_ERROR_PATTERN:?}, got: {err}"
        ))),
    }
}

fn ensure_contains(structure: &str, family: &str) -> CaseResult {
    if structure.contains(family) {
        Ok(())
    } else {
        Err(CaseFailure::assertion(format!(
            "no {family} found in resource structure {structure}"
        )))
    }
}

fn non_empty(output: String) -> CaseResult {
    if output.trim().is_empty() {
        Err(CaseFailure::assertion("command returned an empty output"))
    } else {
        Ok(())
    }
}

// ──────────────────── params ────────────────────

fn param(target: &TargetHandle, command: &str, key: &str) -> Option<String> {
    target
        .descriptor()
        .tests
        .params
        .get(command)
        .and_then(|values| values.get(key))
        .filter(|value| !value.trim().is_empty())
        .cloned()
}

fn required_param(target: &TargetHandle, command: &str, key: &str) -> Result<String> {
    param(target, command, key).ok_or_else(|| ShtError::InvalidConfig {
        details: format!(
            "{}: tests.params.{command}.{key} is required",
            target.name()
        ),
    })
}

/// Command params minus the key the body passes explicitly.
fn extra_params(target: &TargetHandle, command: &str, explicit: &str) -> CommandParams {
    let mut params = target.descriptor().tests.params_for(command);
    params.remove(explicit);
    params
}

fn store_root(ctx: &CaseContext) -> String {
    ctx.store.url().trim_end_matches('/').to_string()
}

// ──────────────────── bodies ────────────────────

fn autoload_with_ports(target: &TargetHandle, port_family: &str) -> CaseResult {
    target.autoload()?;
    let structure = target.details()?.structure();
    ensure_contains(&structure, port_family)
}

fn custom_command(target: &TargetHandle, method: &str) -> Result<String> {
    let command = param(target, method, "custom_command")
        .unwrap_or_else(|| DEFAULT_CUSTOM_COMMAND.to_string());
    if method == "run_custom_config_command" {
        target.run_custom_config_command(&command)
    } else {
        target.run_custom_command(&command)
    }
}

fn save_config(ctx: &CaseContext, method: &str) -> CaseResult {
    let target = ctx.target.as_ref();
    match method {
        "save_running_config" | "save_startup_config" => {
            let configuration_type = configuration_type(method);
            let file_name = target.save(&ctx.store.url(), configuration_type)?;
            if ctx.store.get_file(&file_name).is_err() {
                return Err(CaseFailure::assertion(format!(
                    "saved configuration {file_name} not found at {}",
                    ctx.store.url()
                )));
            }
            ctx.store.delete_file(&file_name)?;
            Ok(())
        }
        "orchestration_save_shallow" => non_empty(target.orchestration_save("shallow", "")?),
        "orchestration_save_deep" => non_empty(target.orchestration_save("deep", "")?),
        other => Err(unknown_method(TestCaseKind::SaveConfig, other)),
    }
}

fn save_config_without_device(ctx: &CaseContext, method: &str) -> CaseResult {
    let target = ctx.target.as_ref();
    match method {
        "save_running_config" | "save_startup_config" => {
            expect_connection_error(target.save(&ctx.store.url(), configuration_type(method)))
        }
        "orchestration_save_shallow" => {
            expect_connection_error(target.orchestration_save("shallow", ""))
        }
        "orchestration_save_deep" => expect_connection_error(target.orchestration_save("deep", "")),
        other => Err(unknown_method(TestCaseKind::SaveConfigWithoutDevice, other)),
    }
}

fn restore_config(ctx: &CaseContext, method: &str) -> CaseResult {
    let target = ctx.target.as_ref();
    let (configuration_type, restore_method) = restore_variant(method)?;
    let file_name = target.save(&ctx.store.url(), configuration_type)?;
    let path = format!("{}/{file_name}", store_root(ctx));
    let restored = target.restore(&path, configuration_type, restore_method);
    let cleanup = ctx.store.delete_file(&file_name);
    restored?;
    cleanup?;
    Ok(())
}

fn configuration_type(method: &str) -> &'static str {
    if method.contains("startup") {
        "startup"
    } else {
        "running"
    }
}

/// `restore_running_config_append` -> (`running`, `append`).
fn restore_variant(method: &str) -> std::result::Result<(&'static str, &'static str), CaseFailure> {
    let restore_method = if method.ends_with("_append") {
        "append"
    } else if method.ends_with("_override") {
        "override"
    } else {
        return Err(unknown_method(TestCaseKind::RestoreConfig, method));
    };
    Ok((configuration_type(method), restore_method))
}

fn unknown_method(kind: TestCaseKind, method: &str) -> CaseFailure {
    CaseFailure::Error(ShtError::Runtime {
        details: format!("{kind} has no method {method}"),
    })
}

fn connectivity(target: &TargetHandle) -> CaseResult {
    if !target.is_autoload_finished() {
        target.autoload()?;
    }
    let api = target.api();
    let dut = api
        .create_resource("DUT", DUT_MODEL, DUT_ADDRESS)
        .map_err(|e| ShtError::platform("create_resource", e))?;

    let outcome = wire_through_dut(target, &dut);
    let deleted = api
        .delete_resource(&dut)
        .map_err(|e| ShtError::platform("delete_resource", e));
    outcome?;
    deleted?;
    Ok(())
}

fn wire_through_dut(target: &TargetHandle, dut: &str) -> CaseResult {
    let api = target.api();
    let reservation_id = target.reservation_id();
    api.add_resource_to_reservation(reservation_id, dut)
        .map_err(|e| ShtError::platform("add_resource_to_reservation", e))?;
    api.resource_autoload(dut)
        .map_err(|e| ShtError::platform("resource_autoload", e))?;

    let target_info = target.details()?;
    let dut_info = api
        .get_resource_details(dut)
        .map_err(|e| ShtError::platform("get_resource_details", e))?;
    let (target_port1, target_port2) = two_ports(&target_info)?;
    let (dut_port1, dut_port2) = two_ports(&dut_info)?;

    for (target_port, dut_port) in [(target_port1, dut_port1), (target_port2, dut_port2)] {
        api.add_physical_connection(reservation_id, target_port, dut_port)
            .map_err(|e| ShtError::platform("add_physical_connection", e))?;
    }
    api.connect_ports_with_connector(reservation_id, dut_port1, dut_port2, "test-connector")
        .map_err(|e| ShtError::platform("connect_ports_with_connector", e))?;
    api.remove_connector(reservation_id, dut_port1, dut_port2)
        .map_err(|e| ShtError::platform("remove_connector", e))?;
    Ok(())
}

fn two_ports(info: &ResourceInfo) -> std::result::Result<(&str, &str), CaseFailure> {
    let missing = || {
        CaseFailure::assertion(format!(
            "{} needs two {PORT_FAMILY} children for the connectivity check",
            info.name
        ))
    };
    let first = info.find_port(PORT_FAMILY, &[]).ok_or_else(missing)?;
    let second = info.find_port(PORT_FAMILY, &[first]).ok_or_else(missing)?;
    Ok((first, second))
}

/// Controller commands drive the related chassis, which must be autoloaded first.
fn ensure_related_autoloaded(ctx: &CaseContext) -> Result<()> {
    if let Some(related) = &ctx.related
        && !related.is_autoload_finished()
    {
        related.autoload()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::tests::{StubPlatform, offline_router, real_router};

    #[test]
    fn network_autoload_finds_ports() {
        let platform = StubPlatform::new();
        let ctx = real_router(&platform);
        run(TestCaseKind::AutoloadNetworkDevices, "structure", &ctx).unwrap();
        assert!(ctx.target.is_autoload_finished());
    }

    #[test]
    fn without_device_autoload_expects_connection_error() {
        let platform = StubPlatform::new();
        let ctx = offline_router(&platform, "r1", "127.0.0.1");
        run(TestCaseKind::AutoloadWithoutDevice, "structure", &ctx).unwrap();

        let reachable = offline_router(&platform, "r2", "10.0.0.2");
        let failure =
            run(TestCaseKind::AutoloadWithoutDevice, "structure", &reachable).unwrap_err();
        assert!(failure.message().contains("but the call succeeded"));
    }

    #[test]
    fn save_config_checks_the_store_and_cleans_up() {
        let platform = StubPlatform::new();
        let ctx = real_router(&platform);
        run(TestCaseKind::SaveConfig, "save_running_config", &ctx).unwrap();
        run(TestCaseKind::SaveConfig, "save_startup_config", &ctx).unwrap();
        assert!(ctx.store.list_files().unwrap().is_empty());
    }

    #[test]
    fn orchestration_save_returns_artifact_info() {
        let platform = StubPlatform::new();
        let ctx = real_router(&platform);
        run(TestCaseKind::SaveConfig, "orchestration_save_shallow", &ctx).unwrap();
        run(TestCaseKind::SaveConfig, "orchestration_save_deep", &ctx).unwrap();
        let failure = run(TestCaseKind::SaveConfig, "save_nothing", &ctx).unwrap_err();
        assert!(failure.is_error());
    }

    #[test]
    fn restore_config_round_trips_through_the_store() {
        let platform = StubPlatform::new();
        let ctx = real_router(&platform);
        for method in TestCaseKind::RestoreConfig.methods() {
            run(TestCaseKind::RestoreConfig, method, &ctx).unwrap();
        }
        assert!(ctx.store.list_files().unwrap().is_empty());
    }

    #[test]
    fn without_device_restore_uses_placeholder_path() {
        let platform = StubPlatform::new();
        let ctx = offline_router(&platform, "r1", "127.0.0.1");
        let method = "restore_startup_config_override";
        run(TestCaseKind::RestoreConfigWithoutDevice, method, &ctx).unwrap();
        assert!(
            platform
                .sim
                .journal()
                .iter()
                .any(|entry| entry == "execute_command r1 restore")
        );
    }

    #[test]
    fn custom_command_reads_params() {
        let platform = StubPlatform::new();
        let ctx = real_router(&platform);
        run(TestCaseKind::RunCustomCommand, "run_custom_command", &ctx).unwrap();
        run(TestCaseKind::RunCustomCommand, "run_custom_config_command", &ctx).unwrap();
    }

    #[test]
    fn connectivity_wires_and_removes_the_dut() {
        let platform = StubPlatform::new();
        let ctx = real_router(&platform);
        run(TestCaseKind::Connectivity, "connectivity", &ctx).unwrap();

        assert_eq!(platform.sim.calls("add_physical_connection"), 2);
        assert_eq!(platform.sim.calls("connect_ports_with_connector"), 1);
        assert_eq!(platform.sim.calls("remove_connector"), 1);
        assert!(!platform.sim.resource_names().iter().any(|name| name.starts_with("DUT")));
    }

    #[test]
    fn load_config_requires_location() {
        let platform = StubPlatform::new();
        let ctx = real_router(&platform);
        let failure = run(TestCaseKind::LoadConfig, "load_config", &ctx).unwrap_err();
        assert!(failure.is_error());
        assert!(failure.message().contains("config_file_location"));
    }

    #[test]
    fn restore_variant_parses_method_names() {
        assert_eq!(
            restore_variant("restore_running_config_append").unwrap(),
            ("running", "append")
        );
        assert_eq!(
            restore_variant("restore_startup_config_override").unwrap(),
            ("startup", "override")
        );
        assert!(restore_variant("restore").is_err());
    }
}

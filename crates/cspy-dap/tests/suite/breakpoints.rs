use cspy_rpc::mock::MockCall;
use serde_json::{json, Value};

use super::support::Harness;

fn set_breakpoints(path: &str, breakpoints: Value) -> Value {
    json!({
        "source": { "path": path },
        "breakpoints": breakpoints,
    })
}

#[tokio::test]
async fn breakpoints_install_with_driver_category_and_location() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let response = harness
        .call(
            "setBreakpoints",
            set_breakpoints(
                "/work/app/main.c",
                json!([{ "line": 12 }, { "line": 20, "column": 5, "hitCondition": "3" }]),
            ),
        )
        .await;
    assert_eq!(response["success"], true);
    let reported = response["body"]["breakpoints"].as_array().unwrap();
    assert_eq!(reported.len(), 2);
    assert!(reported.iter().all(|bp| bp["verified"] == true));

    let installed = harness.backend.installed_breakpoints();
    assert_eq!(installed.len(), 2);
    assert_eq!(installed[0].ule, "{/work/app/main.c}.12.1");
    assert_eq!(installed[0].category, "STD_CODE2");
    assert_eq!(installed[1].ule, "{/work/app/main.c}.20.5");
    assert_eq!(installed[1].skip_count, 3);

    harness.finish().await;
}

#[tokio::test]
async fn replacing_breakpoints_removes_stale_ones() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    harness
        .call(
            "setBreakpoints",
            set_breakpoints("/work/app/main.c", json!([{ "line": 1 }, { "line": 2 }])),
        )
        .await;
    let response = harness
        .call(
            "setBreakpoints",
            set_breakpoints("/work/app/main.c", json!([{ "line": 2 }])),
        )
        .await;
    assert_eq!(response["body"]["breakpoints"].as_array().unwrap().len(), 1);

    let installed = harness.backend.installed_breakpoints();
    assert_eq!(installed.len(), 1);
    assert_eq!(installed[0].ule, "{/work/app/main.c}.2.1");
    let removals = harness
        .backend
        .calls()
        .into_iter()
        .filter(|call| matches!(call, MockCall::RemoveBreakpoint(_)))
        .count();
    assert_eq!(removals, 1);

    harness.finish().await;
}

#[tokio::test]
async fn unsupported_mode_yields_unverified_breakpoint() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let response = harness
        .call(
            "setBreakpoints",
            set_breakpoints("/work/app/main.c", json!([{ "line": 7, "mode": "hardware" }])),
        )
        .await;
    assert_eq!(response["success"], true);
    let bp = &response["body"]["breakpoints"][0];
    assert_eq!(bp["verified"], false);
    assert_eq!(
        bp["message"],
        "Breakpoint mode 'hardware' is not supported by the driver"
    );
    assert!(harness.backend.installed_breakpoints().is_empty());

    harness.finish().await;
}

#[tokio::test]
async fn unbound_location_is_reported_unverified() {
    let mut harness = Harness::start(1);
    harness.backend.reject_location("{/work/app/main.c}.99.1");
    harness.launch_default(1).await;

    let response = harness
        .call(
            "setBreakpoints",
            set_breakpoints("/work/app/main.c", json!([{ "line": 99 }])),
        )
        .await;
    let bp = &response["body"]["breakpoints"][0];
    assert_eq!(bp["verified"], false);
    assert_eq!(bp["message"], "No code at {/work/app/main.c}.99.1");

    harness.finish().await;
}

#[tokio::test]
async fn set_breakpoint_mode_rejects_unsupported_mode() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let response = harness
        .call("setBreakpointMode", json!({ "mode": "hardware" }))
        .await;
    assert_eq!(response["success"], false);
    harness
        .output("Cannot set breakpoint mode (not supported by driver)")
        .await;

    let modes = harness.call("getBreakpointModes", json!({})).await;
    assert_eq!(modes["body"]["current"], "auto");

    harness.finish().await;
}

#[tokio::test]
async fn set_breakpoint_mode_changes_default_for_new_breakpoints() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;
    // The startup announcement.
    harness.event("breakpointModesChanged").await;

    let response = harness
        .call("setBreakpointMode", json!({ "mode": "trace_start" }))
        .await;
    assert_eq!(response["success"], true);
    harness
        .output("Now using Trace Start breakpoints (only applies to new breakpoints)")
        .await;
    let changed = harness.event("breakpointModesChanged").await;
    assert_eq!(changed["body"]["currentMode"], "trace_start");

    harness
        .call(
            "setBreakpoints",
            set_breakpoints("/work/app/main.c", json!([{ "line": 3 }])),
        )
        .await;
    assert_eq!(
        harness.backend.installed_breakpoints()[0].category,
        "EMUL_TRACE_START"
    );

    let modes = harness.call("getBreakpointModes", json!({})).await;
    assert_eq!(modes["body"]["current"], "trace_start");
    assert_eq!(modes["body"]["modes"].as_array().unwrap().len(), 7);

    harness.finish().await;
}

#[tokio::test]
async fn launch_breakpoint_mode_sets_initial_default() {
    let mut harness = Harness::start(1);
    let mut args = harness.launch_args(1);
    args["breakpointMode"] = json!("flash");
    harness.launch(args).await;

    harness.output("Using 'flash' breakpoint mode.").await;
    let modes = harness.call("getBreakpointModes", json!({})).await;
    assert_eq!(modes["body"]["current"], "flash");

    harness.finish().await;
}

#[tokio::test]
async fn repl_console_command_switches_mode() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let response = harness
        .call(
            "evaluate",
            json!({ "expression": "__breakpoints_set_mode_timer_stop", "context": "repl" }),
        )
        .await;
    assert_eq!(response["success"], true);
    assert_eq!(
        response["body"]["result"],
        "Now using Timer Stop breakpoints (only applies to new breakpoints)"
    );
    assert!(!harness
        .backend
        .calls()
        .iter()
        .any(|call| matches!(call, MockCall::Evaluate(..))));

    let completions = harness
        .call(
            "completions",
            json!({ "text": "__breakpoints_set_mode_tr", "column": 26 }),
        )
        .await;
    let labels: Vec<&str> = completions["body"]["targets"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|item| item["label"].as_str())
        .collect();
    assert_eq!(labels.len(), 3);
    assert!(labels.contains(&"__breakpoints_set_mode_trace_filter"));

    harness.finish().await;
}

#[tokio::test]
async fn breakpoint_types_for_simulator() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let types = harness.call("getBreakpointTypes", json!({})).await;
    assert_eq!(types["body"]["types"], json!(["auto"]));
    assert_eq!(types["body"]["current"], "auto");

    let response = harness.call("useAutoBreakpoints", json!({})).await;
    assert_eq!(response["success"], true);
    let missing = harness.call("useHardwareBreakpoints", json!({})).await;
    assert_eq!(missing["success"], false);

    harness.finish().await;
}

use std::time::Duration;

use cspy_rpc::mock::MockCall;
use serde_json::json;

use super::support::Harness;

#[tokio::test]
async fn launch_announces_version_and_breakpoint_mode_then_runs() {
    let mut harness = Harness::start(1);

    let init = harness.call("initialize", json!({})).await;
    assert_eq!(init["body"]["supportsConfigurationDoneRequest"], true);
    let modes = init["body"]["breakpointModes"].as_array().unwrap();
    assert_eq!(modes.len(), 9);
    assert_eq!(modes[0]["appliesTo"], json!(["source"]));

    let args = harness.launch_args(1);
    let launch_seq = harness.request("launch", args).await;
    harness.output("Using C-SPY version: 9.50.1").await;
    harness.output("Using 'auto' breakpoint mode.").await;
    let modes_changed = harness.event("breakpointModesChanged").await;
    assert_eq!(modes_changed["body"]["currentMode"], "auto");
    harness.event("initialized").await;

    harness.call("configurationDone", json!({})).await;
    harness.output("Session started").await;
    let launch = harness.response(launch_seq).await;
    assert_eq!(launch["success"], true);
    // Requests are served in order, so this lands after the initial run.
    harness.call("threads", json!({})).await;

    let calls = harness.backend.calls();
    assert!(calls
        .iter()
        .any(|call| matches!(call, MockCall::StartSession(d) if d.driver == "Simulator")));
    assert!(calls.iter().any(|call| matches!(call, MockCall::LoadModule(_))));
    assert!(calls.contains(&MockCall::MultiGo));

    harness.finish().await;
}

#[tokio::test]
async fn nonexistent_program_fails_launch_and_leaves_no_session() {
    let mut harness = Harness::start(1);
    harness.call("initialize", json!({})).await;

    let launch = harness
        .call(
            "launch",
            json!({
                "program": "/no/such/dir/app.out",
                "target": "arm",
                "driver": "Simulator",
                "driverOptions": [],
            }),
        )
        .await;
    assert_eq!(launch["success"], false);
    assert!(launch["message"].as_str().unwrap().contains("does not exist"));
    assert!(!harness.backend.calls().contains(&MockCall::Connect));

    let threads = harness.call("threads", json!({})).await;
    assert_eq!(threads["success"], false);
    assert_eq!(threads["message"], "no active session");

    harness.finish().await;
}

#[tokio::test]
async fn missing_required_field_is_reported() {
    let mut harness = Harness::start(1);
    let launch = harness
        .call("launch", json!({ "target": "arm", "driver": "Simulator", "driverOptions": [] }))
        .await;
    assert_eq!(launch["success"], false);
    assert_eq!(launch["message"], "Missing required field 'program'.");
    harness.finish().await;
}

#[tokio::test]
async fn backend_failure_tears_down_and_allows_retry() {
    let mut harness = Harness::start(1);
    harness.backend.fail_method("startSession", "Failed to load flash loader");

    let args = harness.launch_args(1);
    let launch = harness.call("launch", args).await;
    assert_eq!(launch["success"], false);
    assert_eq!(launch["message"], "Failed to load flash loader");

    let calls = harness.backend.calls();
    let close_debugger = calls.iter().position(|c| *c == MockCall::CloseDebugger).unwrap();
    let close_registry = calls.iter().position(|c| *c == MockCall::CloseRegistry).unwrap();
    assert!(close_debugger < close_registry);
    assert!(!calls.contains(&MockCall::StopSession));

    harness.backend.clear_failures();
    harness.launch_default(1).await;
    let threads = harness.call("threads", json!({})).await;
    assert_eq!(threads["success"], true);

    harness.finish().await;
}

#[tokio::test]
async fn missing_configuration_done_times_out_and_proceeds() {
    let mut harness = Harness::start_with_timeout(1, Duration::from_millis(50));

    let args = harness.launch_args(1);
    let launch_seq = harness.request("launch", args).await;
    harness.event("initialized").await;
    harness.output("Session started").await;
    let launch = harness.response(launch_seq).await;
    assert_eq!(launch["success"], true);

    harness.finish().await;
}

#[tokio::test]
async fn stop_on_symbol_flag_stops_immediately() {
    let mut harness = Harness::start(1);
    let mut args = harness.launch_args(1);
    args["stopOnSymbol"] = json!(true);

    harness.launch(args).await;
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "entry");
    assert_eq!(stopped["body"]["threadId"], 0);
    assert_eq!(stopped["body"]["allThreadsStopped"], true);
    assert!(!harness.backend.calls().iter().any(MockCall::is_execution_control));

    harness.finish().await;
}

#[tokio::test]
async fn stop_on_symbol_name_runs_to_symbol_and_reports_entry() {
    let mut harness = Harness::start(1);
    let mut args = harness.launch_args(1);
    args["stopOnSymbol"] = json!("reset_handler");

    harness.launch(args).await;
    harness.call("threads", json!({})).await;
    assert!(harness
        .backend
        .calls()
        .contains(&MockCall::RunToLocation(None, "reset_handler".to_owned())));

    harness.backend.stop_cores(&[0]);
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "entry");

    harness.finish().await;
}

use cspy_rpc::mock::MockCall;
use cspy_rpc::{DebugEventKind, EvaluationResult, StackFrameInfo, StepKind};
use serde_json::json;

use super::support::Harness;

#[tokio::test]
async fn single_core_breakpoint_stop_is_reported() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;
    harness.call("threads", json!({})).await;

    harness.backend.stop_cores(&[0]);
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "breakpoint");
    assert_eq!(stopped["body"]["threadId"], 0);
    assert_eq!(stopped["body"]["allThreadsStopped"], true);

    harness.finish().await;
}

#[tokio::test]
async fn threads_are_named_after_cores() {
    let mut harness = Harness::start(2);
    harness.backend.set_core_description(1, "Cortex-M0+");
    harness.launch_default(2).await;

    let threads = harness.call("threads", json!({})).await;
    assert_eq!(
        threads["body"]["threads"],
        json!([
            { "id": 0, "name": "0: Core 0" },
            { "id": 1, "name": "1: Cortex-M0+" },
        ])
    );

    harness.finish().await;
}

#[tokio::test]
async fn partial_stop_reports_only_stopped_core() {
    let mut harness = Harness::start(2);
    harness.launch_default(2).await;
    harness.call("threads", json!({})).await;

    harness.backend.stop_cores(&[1]);
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["threadId"], 1);
    assert_eq!(stopped["body"]["allThreadsStopped"], false);

    harness.backend.stop_cores(&[0]);
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["threadId"], 0);
    assert_eq!(stopped["body"]["allThreadsStopped"], false);

    harness.finish().await;
}

#[tokio::test]
async fn full_stop_focuses_the_deliberately_stopped_core() {
    let mut harness = Harness::start(2);
    harness.backend.set_stopped_deliberately(0, false);
    harness.launch_default(2).await;
    harness.call("threads", json!({})).await;

    harness.backend.stop_cores(&[0, 1]);
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["threadId"], 1);
    assert_eq!(stopped["body"]["allThreadsStopped"], true);

    // One event covers both cores.
    let rest = harness.drain_for(std::time::Duration::from_millis(100)).await;
    assert!(!rest.iter().any(|msg| msg["event"] == "stopped"));

    harness.finish().await;
}

#[tokio::test]
async fn lockstep_disabled_steps_and_continues_one_core() {
    let mut harness = Harness::start(2);
    let mut args = harness.launch_args(2);
    args["multicoreLockstepModeEnabled"] = json!(false);
    args["stopOnSymbol"] = json!(true);
    harness.launch(args).await;
    harness.event("stopped").await;

    let next = harness
        .call("next", json!({ "threadId": 1, "granularity": "instruction" }))
        .await;
    assert_eq!(next["success"], true);
    assert!(harness
        .backend
        .calls()
        .contains(&MockCall::Step(Some(1), StepKind::InstructionOver)));

    harness.backend.stop_cores(&[1]);
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "step");
    assert_eq!(stopped["body"]["threadId"], 1);

    let cont = harness.call("continue", json!({ "threadId": 1 })).await;
    assert_eq!(cont["body"]["allThreadsContinued"], false);
    assert!(harness.backend.calls().contains(&MockCall::GoCore(1)));

    harness.finish().await;
}

#[tokio::test]
async fn lockstep_can_be_toggled_at_runtime() {
    let mut harness = Harness::start(2);
    let mut args = harness.launch_args(2);
    args["stopOnSymbol"] = json!(true);
    harness.launch(args).await;

    let toggled = harness
        .call("setLockstepModeEnabled", json!({ "enabled": false }))
        .await;
    assert_eq!(toggled["success"], true);

    harness.call("stepIn", json!({ "threadId": 0 })).await;
    assert!(harness
        .backend
        .calls()
        .contains(&MockCall::Step(Some(0), StepKind::Into)));

    harness.finish().await;
}

#[tokio::test]
async fn step_on_unknown_thread_fails() {
    let mut harness = Harness::start(2);
    let mut args = harness.launch_args(2);
    args["multicoreLockstepModeEnabled"] = json!(false);
    harness.launch(args).await;

    let response = harness.call("next", json!({ "threadId": 5 })).await;
    assert_eq!(response["success"], false);
    assert_eq!(response["message"], "Invalid thread id 5");

    harness.finish().await;
}

#[tokio::test]
async fn pause_stops_every_core_in_lockstep() {
    let mut harness = Harness::start(2);
    harness.backend.set_auto_stop(true);
    harness.launch_default(2).await;
    // The initial multi-go stops straight away under auto-stop.
    harness.event("stopped").await;

    let response = harness.call("pause", json!({ "threadId": 0 })).await;
    assert_eq!(response["success"], true);
    let calls = harness.backend.calls();
    assert!(calls.contains(&MockCall::StopCore(0)));
    assert!(calls.contains(&MockCall::StopCore(1)));

    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "pause");
    assert_eq!(stopped["body"]["allThreadsStopped"], true);

    harness.finish().await;
}

#[tokio::test]
async fn restart_resets_and_runs_to_main() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let response = harness.call("restart", json!({})).await;
    assert_eq!(response["success"], true);
    let calls = harness.backend.calls();
    let reset = calls.iter().position(|c| *c == MockCall::Reset).unwrap();
    let run_to_main = calls
        .iter()
        .position(|c| *c == MockCall::RunToLocation(None, "main".to_owned()))
        .unwrap();
    assert!(reset < run_to_main);

    harness.backend.stop_cores(&[0]);
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "entry");

    harness.finish().await;
}

#[tokio::test]
async fn program_exit_is_reported_as_exit_stop() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;
    harness.call("threads", json!({})).await;

    harness.backend.emit_debug(DebugEventKind::ProgramExit);
    harness.backend.stop_cores(&[0]);
    let stopped = harness.event("stopped").await;
    assert_eq!(stopped["body"]["reason"], "exit");

    harness.finish().await;
}

#[tokio::test]
async fn failed_resume_is_reported_and_forgotten() {
    let mut harness = Harness::start(1);
    let mut args = harness.launch_args(1);
    args["stopOnSymbol"] = json!(true);
    harness.launch(args).await;
    harness.event("stopped").await;

    harness.backend.fail_method("multiGo", "Target not responding");
    let response = harness.call("continue", json!({ "threadId": 0 })).await;
    assert_eq!(response["success"], false);
    assert_eq!(response["message"], "Target not responding");

    // The failed resume left nothing to report.
    harness.backend.stop_cores(&[0]);
    let rest = harness.drain_for(std::time::Duration::from_millis(100)).await;
    assert!(!rest.iter().any(|msg| msg["event"] == "stopped"));

    harness.finish().await;
}

#[tokio::test]
async fn backend_log_lines_become_output() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    harness.backend.emit_log("Flash loader finished");
    let output = harness.output("Flash loader finished").await;
    assert_eq!(output["body"]["category"], "console");

    harness.finish().await;
}

#[tokio::test]
async fn inspection_requests_pass_through_to_the_backend() {
    let mut harness = Harness::start(1);
    harness.backend.set_stack_frames(
        0,
        vec![
            StackFrameInfo {
                id: 10,
                name: "blink".to_owned(),
                source_path: Some("/work/app/led.c".to_owned()),
                line: 14,
                column: 3,
            },
            StackFrameInfo {
                id: 11,
                name: "main".to_owned(),
                source_path: None,
                line: 0,
                column: 0,
            },
        ],
    );
    harness.backend.set_expression(
        "counter",
        EvaluationResult {
            value: "42".to_owned(),
            type_name: Some("int".to_owned()),
            variables_reference: 0,
        },
    );
    harness.launch_default(1).await;

    let trace = harness
        .call("stackTrace", json!({ "threadId": 0, "levels": 1 }))
        .await;
    assert_eq!(trace["body"]["totalFrames"], 2);
    let frames = trace["body"]["stackFrames"].as_array().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["name"], "blink");
    assert_eq!(frames[0]["source"]["name"], "led.c");

    let value = harness
        .call("evaluate", json!({ "expression": "counter", "context": "watch" }))
        .await;
    assert_eq!(value["body"]["result"], "42");
    assert_eq!(value["body"]["type"], "int");

    let unknown = harness
        .call("evaluate", json!({ "expression": "nope", "context": "hover" }))
        .await;
    assert_eq!(unknown["success"], false);
    assert_eq!(unknown["message"], "Unknown symbol: nope");

    harness.finish().await;
}

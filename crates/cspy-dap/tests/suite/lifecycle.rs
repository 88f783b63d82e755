use cspy_rpc::mock::MockCall;
use cspy_rpc::{DebugEvent, DebugEventKind, Notification};
use serde_json::json;

use super::support::Harness;

#[tokio::test]
async fn terminate_tears_down_in_reverse_order() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let response = harness.call("terminate", json!({})).await;
    assert_eq!(response["success"], true);
    harness.output("Shutting down C-SPY...").await;
    harness.event("terminated").await;

    let calls = harness.backend.calls();
    let position = |wanted: MockCall| calls.iter().position(|call| *call == wanted).unwrap();
    let stop_session = position(MockCall::StopSession);
    let close_debugger = position(MockCall::CloseDebugger);
    let close_registry = position(MockCall::CloseRegistry);
    assert!(stop_session < close_debugger);
    assert!(close_debugger < close_registry);

    let threads = harness.call("threads", json!({})).await;
    assert_eq!(threads["success"], false);
    assert_eq!(threads["message"], "no active session");

    harness.finish().await;
}

#[tokio::test]
async fn disconnect_ends_session_and_server() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let backend = harness.backend.clone();
    harness.finish().await;
    assert!(backend.calls().contains(&MockCall::StopSession));
    assert!(backend.calls().contains(&MockCall::CloseRegistry));
}

#[tokio::test]
async fn disconnect_without_session_is_accepted() {
    let harness = Harness::start(1);
    let backend = harness.backend.clone();
    harness.finish().await;
    assert!(backend.calls().is_empty());
}

#[tokio::test]
async fn lost_connection_terminates_session() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    harness.backend.disconnect();
    harness.event("terminated").await;
    assert!(harness.backend.calls().contains(&MockCall::CloseRegistry));

    let threads = harness.call("threads", json!({})).await;
    assert_eq!(threads["message"], "no active session");

    harness.finish().await;
}

#[tokio::test]
async fn fatal_error_is_shown_and_terminates() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    harness.backend.emit(Notification::Debug(DebugEvent::with_message(
        DebugEventKind::FatalError,
        "Lost contact with the probe",
    )));
    harness.output("Lost contact with the probe").await;
    harness.event("terminated").await;

    harness.finish().await;
}

#[tokio::test]
async fn silent_fatal_error_terminates_without_output() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    harness.backend.emit(Notification::Debug(DebugEvent::with_message(
        DebugEventKind::SilentFatalError,
        "already reported",
    )));
    harness.event("terminated").await;
    let seen = harness.drain_for(std::time::Duration::from_millis(50)).await;
    assert!(!seen.iter().any(|msg| msg["body"]["output"]
        .as_str()
        .is_some_and(|text| text.contains("already reported"))));

    harness.finish().await;
}

#[tokio::test]
async fn second_launch_is_rejected_while_live() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    let args = harness.launch_args(1);
    let again = harness.call("launch", args).await;
    assert_eq!(again["success"], false);

    let threads = harness.call("threads", json!({})).await;
    assert_eq!(threads["success"], true);

    harness.finish().await;
}

#[tokio::test]
async fn closing_the_client_stream_shuts_down_the_session() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;
    let backend = harness.backend.clone();

    harness.close_client().await;
    assert!(backend.calls().contains(&MockCall::CloseRegistry));
}

#[tokio::test]
async fn request_hitting_a_closed_connection_terminates_session() {
    let mut harness = Harness::start(1);
    harness.launch_default(1).await;

    harness.backend.drop_connection_on("getStack");
    let trace = harness.call("stackTrace", json!({ "threadId": 0 })).await;
    assert_eq!(trace["success"], false);
    harness.event("terminated").await;
    assert!(harness.backend.calls().contains(&MockCall::CloseRegistry));

    let threads = harness.call("threads", json!({})).await;
    assert_eq!(threads["message"], "no active session");

    harness.finish().await;
}

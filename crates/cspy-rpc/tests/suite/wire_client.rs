use std::time::Duration;

use cspy_rpc::wire::{WireClient, WireClientConfig};
use cspy_rpc::{CoreState, DebugEventKind, DebuggerClient, Notification, RpcError, ServiceRegistry};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

struct Peer {
    lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().await.unwrap();
        Self::from_stream(stream)
    }

    fn from_stream(stream: TcpStream) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn next_request(&mut self) -> Value {
        let line = self.lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "request");
        value
    }

    async fn send(&mut self, value: Value) {
        let mut line = serde_json::to_string(&value).unwrap();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    async fn reply(&mut self, request: &Value, result: Value) {
        self.send(json!({ "type": "reply", "id": request["id"], "result": result }))
            .await;
    }
}

#[tokio::test]
async fn calls_are_correlated_with_replies() {
    let (listener, addr) = listen().await;
    let client_task = tokio::spawn(async move {
        let client = WireClient::connect(&addr).await.unwrap();
        let debugger = client.debugger().await.unwrap();
        let first = debugger.core_state(0).await.unwrap();
        let second = debugger.core_state(1).await.unwrap();
        (first, second)
    });

    let mut peer = Peer::accept(&listener).await;
    let lookup = peer.next_request().await;
    assert_eq!(lookup["method"], "registry.findService");
    assert_eq!(lookup["params"]["name"], "debugger");
    peer.reply(&lookup, json!(true)).await;

    let first = peer.next_request().await;
    assert_eq!(first["method"], "debugger.getCoreState");
    assert_eq!(first["params"]["core"], 0);
    peer.reply(&first, json!("running")).await;

    let second = peer.next_request().await;
    assert_eq!(second["params"]["core"], 1);
    peer.reply(&second, json!("stopped")).await;

    let (first, second) = client_task.await.unwrap();
    assert_eq!(first, CoreState::Running);
    assert_eq!(second, CoreState::Stopped);
}

#[tokio::test]
async fn missing_service_is_reported() {
    let (listener, addr) = listen().await;
    let client_task = tokio::spawn(async move {
        let client = WireClient::connect(&addr).await.unwrap();
        client.breakpoints().await.map(|_| ())
    });

    let mut peer = Peer::accept(&listener).await;
    let lookup = peer.next_request().await;
    peer.reply(&lookup, json!(false)).await;

    let err = client_task.await.unwrap().unwrap_err();
    assert!(matches!(err, RpcError::ServiceUnavailable(name) if name == "breakpoints"));
}

#[tokio::test]
async fn remote_errors_keep_culprit() {
    let (listener, addr) = listen().await;
    let client_task = tokio::spawn(async move {
        let client = WireClient::connect(&addr).await.unwrap();
        DebuggerClient::multi_go(&client).await
    });

    let mut peer = Peer::accept(&listener).await;
    let request = peer.next_request().await;
    assert_eq!(request["method"], "debugger.multiGo");
    peer.send(json!({
        "type": "reply",
        "id": request["id"],
        "error": { "message": "Target not responding", "culprit": "armproc.dll" }
    }))
    .await;

    let err = client_task.await.unwrap().unwrap_err();
    assert_eq!(err.to_string(), "Target not responding");
    assert_eq!(err.culprit(), Some("armproc.dll"));
}

#[tokio::test]
async fn notifications_reach_subscribers() {
    let (listener, addr) = listen().await;
    let connect = tokio::spawn(async move { WireClient::connect(&addr).await.unwrap() });
    let mut peer = Peer::accept(&listener).await;
    let client = connect.await.unwrap();
    let mut events = ServiceRegistry::subscribe(&client);

    peer.send(json!({
        "type": "notification",
        "notification": { "channel": "log", "text": "Loaded debugee" }
    }))
    .await;
    peer.send(json!({
        "type": "notification",
        "notification": { "channel": "debug", "kind": "coreStopped" }
    }))
    .await;

    match events.recv().await.unwrap() {
        Notification::Log(log) => assert_eq!(log.text, "Loaded debugee"),
        other => panic!("unexpected notification {other:?}"),
    }
    match events.recv().await.unwrap() {
        Notification::Debug(event) => assert_eq!(event.kind, DebugEventKind::CoreStopped),
        other => panic!("unexpected notification {other:?}"),
    }
}

#[tokio::test]
async fn connection_loss_fails_pending_calls_and_closes_notifications() {
    let (listener, addr) = listen().await;
    let connect = tokio::spawn(async move { WireClient::connect(&addr).await.unwrap() });
    let mut peer = Peer::accept(&listener).await;
    let client = connect.await.unwrap();
    let mut events = client.subscribe_events();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { DebuggerClient::reset(&client).await })
    };
    let request = peer.next_request().await;
    assert_eq!(request["method"], "debugger.reset");
    drop(peer);

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_connection_lost(), "{err:?}");
    assert!(matches!(events.recv().await, Err(RecvError::Closed)));
    assert!(client.shutdown_token().is_cancelled());

    let err = DebuggerClient::reset(&client).await.unwrap_err();
    assert!(matches!(err, RpcError::ConnectionClosed));
}

#[tokio::test]
async fn unanswered_call_times_out() {
    let (listener, addr) = listen().await;
    let connect = tokio::spawn(async move {
        let config = WireClientConfig {
            reply_timeout: Duration::from_millis(50),
            ..WireClientConfig::default()
        };
        WireClient::connect_with_config(&addr, config).await.unwrap()
    });
    let _peer = Peer::accept(&listener).await;
    let client = connect.await.unwrap();

    let err = DebuggerClient::number_of_cores(&client).await.unwrap_err();
    assert!(matches!(err, RpcError::Timeout));
}

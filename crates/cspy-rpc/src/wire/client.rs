use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{broadcast, oneshot, Mutex},
};
use tokio_util::{
    codec::{FramedRead, FramedWrite, LinesCodec},
    sync::CancellationToken,
};

use super::codec::{decode_message, encode_message, WireMessage, MAX_LINE_LENGTH};
use crate::{
    service::{BreakpointClient, Connector, DebuggerClient, ServiceRegistry},
    types::{
        BreakpointRequest, CoreId, CoreState, EvaluationResult, InstalledBreakpoint, Notification,
        Result, RpcError, ScopeInfo, SessionDescriptor, StackFrameInfo, StepKind, VariableInfo,
    },
};

#[derive(Debug, Clone)]
pub struct WireClientConfig {
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
    pub event_channel_size: usize,
}

impl Default for WireClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            reply_timeout: Duration::from_secs(10),
            event_channel_size: 64,
        }
    }
}

type PendingReply = oneshot::Sender<Result<Value>>;

#[derive(Debug)]
struct Inner {
    writer: Mutex<FramedWrite<OwnedWriteHalf, LinesCodec>>,
    pending: Mutex<HashMap<u64, PendingReply>>,
    next_id: AtomicU64,
    /// Dropped by the read loop on exit so subscribers observe `Closed`.
    events: parking_lot::Mutex<Option<broadcast::Sender<Notification>>>,
    shutdown: CancellationToken,
    config: WireClientConfig,
}

/// Client for the backend's JSON-lines RPC endpoint.
///
/// One connection serves the service registry, the debugger service and the
/// breakpoint service; cloning is cheap and shares the connection.
#[derive(Debug, Clone)]
pub struct WireClient {
    inner: Arc<Inner>,
}

impl WireClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_config(addr, WireClientConfig::default()).await
    }

    pub async fn connect_with_config(addr: &str, config: WireClientConfig) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::Timeout)??;
        let _ = stream.set_nodelay(true);

        let (reader, writer) = stream.into_split();
        let (events, _) = broadcast::channel(config.event_channel_size.max(1));

        let inner = Arc::new(Inner {
            writer: Mutex::new(FramedWrite::new(
                writer,
                LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
            )),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            events: parking_lot::Mutex::new(Some(events)),
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone()));
        tracing::debug!(target: "cspy.rpc", addr, "connected to backend");

        Ok(Self { inner })
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// A token that is cancelled when the client shuts down, either explicitly or
    /// because the connection closed.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Notification> {
        match self.inner.events.lock().as_ref() {
            Some(events) => events.subscribe(),
            // Already disconnected: hand out a receiver whose sender is gone.
            None => broadcast::channel(1).1,
        }
    }

    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)
            .map_err(|err| RpcError::Protocol(format!("failed to encode params: {err}")))?;
        let value = self.call_raw(method, params).await?;
        serde_json::from_value(value)
            .map_err(|err| RpcError::Protocol(format!("unexpected reply to {method}: {err}")))
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value> {
        if self.inner.shutdown.is_cancelled() {
            return Err(RpcError::ConnectionClosed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(id, tx);
        }

        let line = encode_message(&WireMessage::Request {
            id,
            method: method.to_owned(),
            params,
        })?;
        tracing::trace!(target: "cspy.rpc", id, method, "sending request");
        let sent = {
            let mut writer = self.inner.writer.lock().await;
            writer.send(line).await
        };
        if let Err(err) = sent {
            self.remove_pending(id).await;
            return Err(codec_error(err));
        }

        tokio::select! {
            biased;
            res = tokio::time::timeout(self.inner.config.reply_timeout, rx) => {
                match res {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(_closed)) => Err(RpcError::ConnectionClosed),
                    Err(_elapsed) => {
                        self.remove_pending(id).await;
                        Err(RpcError::Timeout)
                    }
                }
            }
            _ = self.inner.shutdown.cancelled() => {
                self.remove_pending(id).await;
                Err(RpcError::Cancelled)
            }
        }
    }

    async fn remove_pending(&self, id: u64) {
        let mut pending = self.inner.pending.lock().await;
        pending.remove(&id);
    }

    async fn find_service(&self, name: &str) -> Result<()> {
        let available: bool = self
            .call("registry.findService", json!({ "name": name }))
            .await?;
        if available {
            Ok(())
        } else {
            Err(RpcError::ServiceUnavailable(name.to_owned()))
        }
    }
}

fn codec_error(err: tokio_util::codec::LinesCodecError) -> RpcError {
    match err {
        tokio_util::codec::LinesCodecError::Io(err) => RpcError::Io(err),
        tokio_util::codec::LinesCodecError::MaxLineLengthExceeded => {
            RpcError::Protocol("message exceeds maximum line length".to_owned())
        }
    }
}

async fn read_loop(reader: OwnedReadHalf, inner: Arc<Inner>) {
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let mut terminated_with_error = false;

    loop {
        let next = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = lines.next() => next,
        };
        let line = match next {
            Some(Ok(line)) => line,
            Some(Err(err)) => {
                tracing::warn!(target: "cspy.rpc", error = %codec_error(err), "backend stream failed");
                terminated_with_error = true;
                break;
            }
            None => {
                terminated_with_error = true;
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match decode_message(&line) {
            Ok(WireMessage::Reply { id, result, error }) => {
                let tx = {
                    let mut pending = inner.pending.lock().await;
                    pending.remove(&id)
                };
                if let Some(tx) = tx {
                    let reply = match error {
                        Some(error) => Err(error.into()),
                        None => Ok(result),
                    };
                    let _ = tx.send(reply);
                }
            }
            Ok(WireMessage::Notification { notification }) => {
                if let Some(events) = inner.events.lock().as_ref() {
                    // No subscribers is fine; notifications before subscription are dropped.
                    let _ = events.send(notification);
                }
            }
            Ok(WireMessage::Request { method, .. }) => {
                tracing::debug!(target: "cspy.rpc", method = %method, "ignoring backend-initiated request");
            }
            Err(err) => {
                tracing::warn!(target: "cspy.rpc", error = %err, "dropping malformed backend message");
            }
        }
    }

    // Fail in-flight calls before cancelling so they observe `ConnectionClosed`
    // rather than `Cancelled`.
    if terminated_with_error {
        tracing::info!(target: "cspy.rpc", "backend connection closed");
        let pending = {
            let mut pending = inner.pending.lock().await;
            std::mem::take(&mut *pending)
        };
        for (_id, tx) in pending {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
    }

    inner.events.lock().take();
    inner.shutdown.cancel();
}

#[async_trait]
impl DebuggerClient for WireClient {
    async fn version_string(&self) -> Result<String> {
        self.call("debugger.getVersionString", Value::Null).await
    }

    async fn start_session(&self, descriptor: &SessionDescriptor) -> Result<()> {
        self.call("debugger.startSession", descriptor).await
    }

    async fn load_module(&self, program: &str) -> Result<()> {
        self.call("debugger.loadModule", json!({ "path": program })).await
    }

    async fn stop_session(&self) -> Result<()> {
        self.call("debugger.stopSession", Value::Null).await
    }

    async fn number_of_cores(&self) -> Result<u32> {
        self.call("debugger.getNumberOfCores", Value::Null).await
    }

    async fn core_state(&self, core: CoreId) -> Result<CoreState> {
        self.call("debugger.getCoreState", json!({ "core": core })).await
    }

    async fn core_stopped_deliberately(&self, core: CoreId) -> Result<bool> {
        self.call("debugger.isCoreStoppedDeliberately", json!({ "core": core }))
            .await
    }

    async fn core_description(&self, core: CoreId) -> Result<String> {
        self.call("debugger.getCoreDescription", json!({ "core": core }))
            .await
    }

    async fn go_core(&self, core: CoreId) -> Result<()> {
        self.call("debugger.goCore", json!({ "core": core })).await
    }

    async fn multi_go(&self) -> Result<()> {
        self.call("debugger.multiGo", Value::Null).await
    }

    async fn stop_core(&self, core: CoreId) -> Result<()> {
        self.call("debugger.stopCore", json!({ "core": core })).await
    }

    async fn step(&self, core: Option<CoreId>, kind: StepKind) -> Result<()> {
        self.call("debugger.step", json!({ "core": core, "kind": kind }))
            .await
    }

    async fn run_to_location(&self, core: Option<CoreId>, location: &str) -> Result<()> {
        self.call(
            "debugger.runToULE",
            json!({ "core": core, "ule": location }),
        )
        .await
    }

    async fn reset(&self) -> Result<()> {
        self.call("debugger.reset", Value::Null).await
    }

    async fn stack_frames(&self, core: CoreId) -> Result<Vec<StackFrameInfo>> {
        self.call("debugger.getStack", json!({ "core": core })).await
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<ScopeInfo>> {
        self.call("debugger.getScopes", json!({ "frameId": frame_id }))
            .await
    }

    async fn variables(&self, variables_reference: i64) -> Result<Vec<VariableInfo>> {
        self.call(
            "debugger.getVariables",
            json!({ "variablesReference": variables_reference }),
        )
        .await
    }

    async fn evaluate(&self, frame_id: Option<i64>, expression: &str) -> Result<EvaluationResult> {
        self.call(
            "debugger.evaluate",
            json!({ "frameId": frame_id, "expression": expression }),
        )
        .await
    }

    async fn close(&self) {
        // The transport belongs to the registry; the service proxy has nothing of its own.
        tracing::debug!(target: "cspy.rpc", "debugger client released");
    }
}

#[async_trait]
impl BreakpointClient for WireClient {
    async fn set_breakpoint(&self, request: &BreakpointRequest) -> Result<InstalledBreakpoint> {
        self.call("breakpoints.setBreakpoint", request).await
    }

    async fn remove_breakpoint(&self, id: u64) -> Result<()> {
        self.call("breakpoints.removeBreakpoint", json!({ "id": id }))
            .await
    }
}

#[async_trait]
impl ServiceRegistry for WireClient {
    async fn debugger(&self) -> Result<Arc<dyn DebuggerClient>> {
        self.find_service("debugger").await?;
        Ok(Arc::new(self.clone()))
    }

    async fn breakpoints(&self) -> Result<Arc<dyn BreakpointClient>> {
        self.find_service("breakpoints").await?;
        Ok(Arc::new(self.clone()))
    }

    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.subscribe_events()
    }

    async fn close(&self) {
        self.shutdown();
    }
}

/// Opens one [`WireClient`] per session.
#[derive(Debug, Clone)]
pub struct WireConnector {
    default_address: String,
    config: WireClientConfig,
}

impl WireConnector {
    pub fn new(default_address: impl Into<String>, config: WireClientConfig) -> Self {
        Self {
            default_address: default_address.into(),
            config,
        }
    }
}

#[async_trait]
impl Connector for WireConnector {
    async fn connect(&self, descriptor: &SessionDescriptor) -> Result<Arc<dyn ServiceRegistry>> {
        let address = descriptor
            .backend_address
            .as_deref()
            .unwrap_or(&self.default_address);
        let client = WireClient::connect_with_config(address, self.config.clone()).await?;
        Ok(Arc::new(client))
    }
}

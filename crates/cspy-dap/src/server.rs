use std::sync::Arc;
use std::time::Duration;

use cspy_config::AdapterConfig;
use cspy_rpc::wire::{WireClientConfig, WireConnector};
use cspy_rpc::Connector;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::dap::codec::{DapError, DapReader, DapWriter};
use crate::dap::messages::Request;
use crate::launch::{DefaultLaunchResolver, LaunchResolver};
use crate::outbound::EventSink;
use crate::session::{Flow, SessionOrchestrator};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Dap(#[from] DapError),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Collaborators and limits for one server run.
#[derive(Clone)]
pub struct ServerOptions {
    pub connector: Arc<dyn Connector>,
    pub resolver: Arc<dyn LaunchResolver>,
    /// How long to wait for `configurationDone` before running the program anyway.
    pub configuration_done_timeout: Duration,
}

impl ServerOptions {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            resolver: Arc::new(DefaultLaunchResolver),
            configuration_done_timeout: cspy_config::SessionConfig::default()
                .configuration_done_timeout(),
        }
    }

    /// Options for the configured backend.
    pub fn from_config(config: &AdapterConfig) -> Self {
        let backend = &config.backend;
        let connector = WireConnector::new(
            backend.address.clone(),
            WireClientConfig {
                connect_timeout: backend.connect_timeout(),
                reply_timeout: backend.reply_timeout(),
                event_channel_size: backend.event_channel_size,
            },
        );
        Self {
            configuration_done_timeout: config.session.configuration_done_timeout(),
            ..Self::new(Arc::new(connector))
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LaunchResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_configuration_done_timeout(mut self, timeout: Duration) -> Self {
        self.configuration_done_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("configuration_done_timeout", &self.configuration_done_timeout)
            .finish_non_exhaustive()
    }
}

/// Run the adapter over stdio against the configured backend.
pub async fn run_stdio(config: &AdapterConfig) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    run(stdin, stdout, ServerOptions::from_config(config))
        .await
        .map_err(anyhow::Error::from)
}

/// Serve DAP requests from `reader` until the client disconnects or the stream ends.
pub async fn run<R, W>(reader: R, writer: W, options: ServerOptions) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
    let shutdown = CancellationToken::new();
    let writer_task = tokio::spawn(write_loop(writer, out_rx, shutdown.clone()));

    let (request_tx, mut requests) = mpsc::unbounded_channel::<Request>();
    let reader_task = tokio::spawn(async move {
        let mut reader = DapReader::new(reader);
        while let Some(request) = reader.read_request().await? {
            if request_tx.send(request).is_err() {
                break;
            }
        }
        Ok::<(), DapError>(())
    });

    let (signal_tx, mut signals) = mpsc::unbounded_channel();
    let mut orchestrator = SessionOrchestrator::new(
        EventSink::new(out_tx),
        signal_tx,
        options.connector,
        options.resolver,
    );

    let mut deadline: Option<Instant> = None;
    loop {
        if orchestrator.awaiting_configuration() {
            deadline.get_or_insert_with(|| Instant::now() + options.configuration_done_timeout);
        } else {
            deadline = None;
        }

        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    break;
                };
                if request.message_type != "request" {
                    continue;
                }
                tracing::debug!(target: "cspy.dap", seq = request.seq, command = %request.command, "request");
                if orchestrator.handle_request(request).await == Flow::Exit {
                    break;
                }
            }
            Some(signal) = signals.recv() => orchestrator.handle_signal(signal).await,
            () = wait_until(deadline) => orchestrator.configuration_deadline_elapsed().await,
        }
    }

    orchestrator.shutdown().await;
    drop(orchestrator);
    shutdown.cancel();
    let _ = writer_task.await;

    reader_task.abort();
    match reader_task.await {
        Ok(result) => result.map_err(ServerError::from),
        Err(_) => Ok(()),
    }
}

async fn write_loop<W>(writer: W, mut messages: mpsc::UnboundedReceiver<Value>, shutdown: CancellationToken)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = DapWriter::new(writer);
    loop {
        let message = tokio::select! {
            biased;
            message = messages.recv() => message,
            () = shutdown.cancelled() => messages.try_recv().ok(),
        };
        let Some(message) = message else {
            return;
        };
        if let Err(err) = writer.write_value(&message).await {
            tracing::warn!(target: "cspy.dap", error = %err, "failed to write DAP message");
            return;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use cspy_dap::dap::codec::{DapReader, DapWriter};
use cspy_dap::server::{self, ServerError, ServerOptions};
use cspy_rpc::mock::MockBackend;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A running adapter wired to a [`MockBackend`], with a DAP client end.
pub struct Harness {
    pub backend: MockBackend,
    reader: DapReader<ReadHalf<DuplexStream>>,
    writer: DapWriter<WriteHalf<DuplexStream>>,
    next_seq: i64,
    /// Messages read while looking for something else.
    unclaimed: VecDeque<Value>,
    server: Option<JoinHandle<Result<(), ServerError>>>,
    program: NamedTempFile,
}

impl Harness {
    pub fn start(n_cores: u32) -> Self {
        Self::start_with_timeout(n_cores, Duration::from_secs(30))
    }

    pub fn start_with_timeout(n_cores: u32, configuration_done_timeout: Duration) -> Self {
        let backend = MockBackend::new(n_cores);
        let options = ServerOptions::new(Arc::new(backend.clone()))
            .with_configuration_done_timeout(configuration_done_timeout);

        let (client, server_stream) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_stream);
        let server = tokio::spawn(server::run(server_read, server_write, options));

        let (client_read, client_write) = tokio::io::split(client);
        Self {
            backend,
            reader: DapReader::new(client_read),
            writer: DapWriter::new(client_write),
            next_seq: 1,
            unclaimed: VecDeque::new(),
            server: Some(server),
            program: NamedTempFile::new().unwrap(),
        }
    }

    pub fn launch_args(&self, n_cores: u32) -> Value {
        json!({
            "program": self.program.path(),
            "target": "arm",
            "driver": "Simulator",
            "driverOptions": [format!("--multicore_nr_of_cores={n_cores}")],
        })
    }

    pub async fn request(&mut self, command: &str, arguments: Value) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let msg = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.writer.write_value(&msg).await.unwrap();
        seq
    }

    pub async fn response(&mut self, request_seq: i64) -> Value {
        self.next_matching(|msg| {
            msg["type"] == "response" && msg["request_seq"].as_i64() == Some(request_seq)
        })
        .await
    }

    pub async fn call(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.request(command, arguments).await;
        self.response(seq).await
    }

    pub async fn event(&mut self, event: &str) -> Value {
        self.next_matching(|msg| msg["type"] == "event" && msg["event"] == event)
            .await
    }

    /// The next `output` event whose text contains `needle`.
    pub async fn output(&mut self, needle: &str) -> Value {
        self.next_matching(|msg| {
            msg["event"] == "output"
                && msg["body"]["output"]
                    .as_str()
                    .is_some_and(|text| text.contains(needle))
        })
        .await
    }

    /// Collect every message that arrives within `window`.
    pub async fn drain_for(&mut self, window: Duration) -> Vec<Value> {
        let mut seen: Vec<Value> = self.unclaimed.drain(..).collect();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Ok(Some(msg))) =
            tokio::time::timeout_at(deadline, self.reader.read_value()).await
        {
            seen.push(msg);
        }
        seen
    }

    async fn next_matching(&mut self, matches: impl Fn(&Value) -> bool) -> Value {
        if let Some(index) = self.unclaimed.iter().position(&matches) {
            return self.unclaimed.remove(index).unwrap();
        }
        loop {
            let msg = tokio::time::timeout(READ_TIMEOUT, self.reader.read_value())
                .await
                .expect("timed out waiting for a DAP message")
                .unwrap()
                .expect("DAP stream ended");
            if matches(&msg) {
                return msg;
            }
            self.unclaimed.push_back(msg);
        }
    }

    /// initialize → launch → configurationDone; returns the launch response.
    pub async fn launch(&mut self, arguments: Value) -> Value {
        let init = self.call("initialize", json!({ "adapterID": "cspy" })).await;
        assert_eq!(init["success"], true);

        let launch_seq = self.request("launch", arguments).await;
        self.event("initialized").await;
        let done = self.call("configurationDone", json!({})).await;
        assert_eq!(done["success"], true);
        self.response(launch_seq).await
    }

    pub async fn launch_default(&mut self, n_cores: u32) -> Value {
        let args = self.launch_args(n_cores);
        let response = self.launch(args).await;
        assert_eq!(response["success"], true, "launch failed: {response}");
        response
    }

    /// Drop the client end without `disconnect` and wait for the server to finish.
    pub async fn close_client(self) {
        let Harness {
            reader,
            writer,
            server,
            ..
        } = self;
        drop(writer);
        drop(reader);
        if let Some(server) = server {
            tokio::time::timeout(READ_TIMEOUT, server)
                .await
                .expect("server did not stop")
                .unwrap()
                .unwrap();
        }
    }

    /// Disconnect and wait for the server to finish.
    pub async fn finish(mut self) {
        let response = self.call("disconnect", json!({})).await;
        assert_eq!(response["success"], true);
        if let Some(server) = self.server.take() {
            tokio::time::timeout(READ_TIMEOUT, server)
                .await
                .expect("server did not stop")
                .unwrap()
                .unwrap();
        }
    }
}

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::dap::messages::{Outgoing, Request};
use crate::dap::types::{OutputEventBody, StoppedEventBody};

/// Handle for queueing messages to the client.
///
/// Every message gets the next sequence number at the moment it is queued, so the
/// writer task emits them in `seq` order.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<Value>,
    seq: Arc<AtomicI64>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            tx,
            seq: Arc::new(AtomicI64::new(1)),
        }
    }

    fn next_seq(&self) -> i64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn send(&self, message: Outgoing) {
        // A closed channel means the writer is gone; nothing left to tell.
        let _ = self.tx.send(to_body(&message));
    }

    pub fn send_event(&self, event: impl Into<String>, body: Option<Value>) {
        self.send(Outgoing::event(self.next_seq(), event, body));
    }

    pub fn send_response(&self, request: &Request, outcome: Result<Option<Value>, String>) {
        self.send(Outgoing::response(self.next_seq(), request, outcome));
    }

    pub fn respond_ok(&self, request: &Request, body: Option<Value>) {
        self.send_response(request, Ok(body));
    }

    pub fn respond_err(&self, request: &Request, message: impl Into<String>) {
        self.send_response(request, Err(message.into()));
    }

    pub fn send_typed_event<T: Serialize>(&self, event: &str, body: &T) {
        self.send_event(event, Some(to_body(body)));
    }

    /// Console output. A trailing newline is added when missing.
    pub fn output(&self, text: impl Into<String>) {
        let mut output = text.into();
        if !output.ends_with('\n') {
            output.push('\n');
        }
        self.send_typed_event(
            "output",
            &OutputEventBody {
                category: "console",
                output,
            },
        );
    }

    pub fn stopped(&self, body: StoppedEventBody) {
        self.send_typed_event("stopped", &body);
    }

    pub fn terminated(&self) {
        self.send_event("terminated", None);
    }
}

pub fn to_body<T: Serialize>(body: &T) -> Value {
    serde_json::to_value(body).unwrap_or_else(|_| json!({}))
}

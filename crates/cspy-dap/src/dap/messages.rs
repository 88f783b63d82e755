use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An incoming client message. Only `type == "request"` is acted upon.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub seq: i64,
    #[serde(rename = "type")]
    pub message_type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A message sent to the client, tagged with its DAP `type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outgoing {
    Response {
        seq: i64,
        request_seq: i64,
        success: bool,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
    Event {
        seq: i64,
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
    },
}

impl Outgoing {
    /// Answer `request`: `Ok` carries the body, `Err` the failure message.
    pub fn response(seq: i64, request: &Request, outcome: Result<Option<Value>, String>) -> Self {
        let (success, body, message) = match outcome {
            Ok(body) => (true, body, None),
            Err(message) => (false, None, Some(message)),
        };
        Outgoing::Response {
            seq,
            request_seq: request.seq,
            success,
            command: request.command.clone(),
            message,
            body,
        }
    }

    pub fn event(seq: i64, event: impl Into<String>, body: Option<Value>) -> Self {
        Outgoing::Event {
            seq,
            event: event.into(),
            body,
        }
    }
}

//! Newline-delimited JSON framing for the backend wire protocol.
//!
//! Every line is one [`WireMessage`]:
//!
//! ```text
//! {"type":"request","id":7,"method":"debugger.getCoreState","params":{"core":1}}
//! {"type":"reply","id":7,"result":"stopped"}
//! {"type":"notification","notification":{"channel":"debug","kind":"coreStopped"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Notification, RpcError};

/// Upper bound for one encoded message. Larger lines are a protocol error.
pub(crate) const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    Request {
        id: u64,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Reply {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WireError>,
    },
    Notification {
        notification: Notification,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub culprit: Option<String>,
}

impl From<WireError> for RpcError {
    fn from(err: WireError) -> Self {
        RpcError::Remote {
            message: err.message,
            culprit: err.culprit,
        }
    }
}

pub fn encode_message(message: &WireMessage) -> Result<String, RpcError> {
    serde_json::to_string(message)
        .map_err(|err| RpcError::Protocol(format!("failed to encode message: {err}")))
}

pub fn decode_message(line: &str) -> Result<WireMessage, RpcError> {
    serde_json::from_str(line)
        .map_err(|err| RpcError::Protocol(format!("malformed message: {err}")))
}

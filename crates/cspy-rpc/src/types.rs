use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Zero-based index of a core on the debug target.
pub type CoreId = u32;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("backend protocol error: {0}")]
    Protocol(String),

    /// The backend executed the call and reported a failure.
    #[error("{message}")]
    Remote {
        message: String,
        /// Component the backend blames for the failure, if it named one.
        culprit: Option<String>,
    },

    #[error("backend call timed out")]
    Timeout,

    #[error("backend call cancelled")]
    Cancelled,

    #[error("backend connection closed")]
    ConnectionClosed,

    #[error("backend service `{0}` is not available")]
    ServiceUnavailable(String),
}

impl RpcError {
    pub fn remote(message: impl Into<String>) -> Self {
        RpcError::Remote {
            message: message.into(),
            culprit: None,
        }
    }

    pub fn culprit(&self) -> Option<&str> {
        match self {
            RpcError::Remote { culprit, .. } => culprit.as_deref().filter(|c| !c.is_empty()),
            _ => None,
        }
    }

    /// Whether this error means the transport itself is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, RpcError::ConnectionClosed | RpcError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoreState {
    Running,
    Stopped,
    #[serde(other)]
    Unknown,
}

impl CoreState {
    /// Anything that is not positively running counts as stopped.
    pub fn is_stopped(self) -> bool {
        self != CoreState::Running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    Over,
    Into,
    Out,
    InstructionOver,
    InstructionInto,
}

/// Tags of the debug notifications pushed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DebugEventKind {
    /// Some core stopped. Carries no core index; listeners must re-poll.
    CoreStopped,
    CoreResumed,
    ProgramExit,
    TargetReset,
    FatalError,
    /// Like `FatalError`, but the backend already told the user.
    SilentFatalError,
    InspectionContextChanged,
    BaseContextChanged,
}

impl DebugEventKind {
    pub fn is_fatal(self) -> bool {
        matches!(self, DebugEventKind::FatalError | DebugEventKind::SilentFatalError)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEvent {
    pub kind: DebugEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DebugEvent {
    pub fn new(kind: DebugEventKind) -> Self {
        Self { kind, message: None }
    }

    pub fn with_message(kind: DebugEventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "camelCase")]
pub enum Notification {
    Debug(DebugEvent),
    Log(LogEvent),
}

/// Everything the backend needs to start a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub program: PathBuf,
    pub target: String,
    pub driver: String,
    #[serde(default)]
    pub driver_options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_path: Option<PathBuf>,
    #[serde(default)]
    pub setup_macros: Vec<PathBuf>,
    #[serde(default)]
    pub device_macros: Vec<PathBuf>,
    #[serde(default)]
    pub plugins: Vec<String>,
    pub n_cores: u32,
    /// Overrides the configured backend address for this session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointRequest {
    /// Location expression, e.g. `{/src/main.c}.12.1`.
    pub ule: String,
    /// Backend breakpoint category, e.g. `EMUL_CODE`.
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default)]
    pub skip_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledBreakpoint {
    pub id: u64,
    pub ule: String,
    /// Whether the backend could bind the breakpoint to code.
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrameInfo {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub column: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeInfo {
    pub name: String,
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableInfo {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub variables_reference: i64,
}

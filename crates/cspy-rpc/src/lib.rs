//! Backend contract for the C-SPY debug adapter.
//!
//! The adapter never talks to a debugger engine directly. It reaches a remote
//! session service through the traits in this crate: a [`Connector`] opens a
//! [`ServiceRegistry`], which hands out the [`DebuggerClient`] and
//! [`BreakpointClient`] proxies and pushes [`Notification`]s.

mod service;
mod types;
pub mod wire;

pub use service::{BreakpointClient, Connector, DebuggerClient, ServiceRegistry};
pub use types::{
    BreakpointRequest, CoreId, CoreState, DebugEvent, DebugEventKind, EvaluationResult,
    InstalledBreakpoint, LogEvent, Notification, Result, RpcError, ScopeInfo, SessionDescriptor,
    StackFrameInfo, StepKind, VariableInfo,
};

// Compiled for this crate's own tests unconditionally, and behind `test-support`
// for downstream crates.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;

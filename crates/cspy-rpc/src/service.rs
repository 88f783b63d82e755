use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::{
    BreakpointRequest, CoreId, CoreState, EvaluationResult, InstalledBreakpoint, Notification,
    Result, ScopeInfo, SessionDescriptor, StackFrameInfo, StepKind, VariableInfo,
};

/// Session-management service of the backend.
///
/// Calls taking `core: Option<CoreId>` apply to one core when given and to the
/// backend's notion of "all cores" otherwise.
#[async_trait]
pub trait DebuggerClient: Send + Sync {
    async fn version_string(&self) -> Result<String>;

    async fn start_session(&self, descriptor: &SessionDescriptor) -> Result<()>;

    async fn load_module(&self, program: &str) -> Result<()>;

    async fn stop_session(&self) -> Result<()>;

    async fn number_of_cores(&self) -> Result<u32>;

    async fn core_state(&self, core: CoreId) -> Result<CoreState>;

    /// Whether the last stop of `core` was caused by the core itself rather than by
    /// multicore synchronization.
    async fn core_stopped_deliberately(&self, core: CoreId) -> Result<bool>;

    async fn core_description(&self, core: CoreId) -> Result<String>;

    async fn go_core(&self, core: CoreId) -> Result<()>;

    /// Resume every core in a single backend operation.
    async fn multi_go(&self) -> Result<()>;

    async fn stop_core(&self, core: CoreId) -> Result<()>;

    async fn step(&self, core: Option<CoreId>, kind: StepKind) -> Result<()>;

    async fn run_to_location(&self, core: Option<CoreId>, location: &str) -> Result<()>;

    async fn reset(&self) -> Result<()>;

    async fn stack_frames(&self, core: CoreId) -> Result<Vec<StackFrameInfo>>;

    async fn scopes(&self, frame_id: i64) -> Result<Vec<ScopeInfo>>;

    async fn variables(&self, variables_reference: i64) -> Result<Vec<VariableInfo>>;

    async fn evaluate(&self, frame_id: Option<i64>, expression: &str) -> Result<EvaluationResult>;

    /// Release the client. No further calls are issued through it afterwards.
    async fn close(&self);
}

#[async_trait]
pub trait BreakpointClient: Send + Sync {
    async fn set_breakpoint(&self, request: &BreakpointRequest) -> Result<InstalledBreakpoint>;

    async fn remove_breakpoint(&self, id: u64) -> Result<()>;
}

/// A live connection to the backend's service registry.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn debugger(&self) -> Result<Arc<dyn DebuggerClient>>;

    async fn breakpoints(&self) -> Result<Arc<dyn BreakpointClient>>;

    /// Subscribe to pushed notifications.
    ///
    /// The channel closes when the connection is lost or closed.
    fn subscribe(&self) -> broadcast::Receiver<Notification>;

    async fn close(&self);
}

/// Establishes backend connections for new sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &SessionDescriptor) -> Result<Arc<dyn ServiceRegistry>>;
}

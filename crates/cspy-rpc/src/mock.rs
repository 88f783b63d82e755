//! In-process stand-in for the backend, used by unit and integration tests.
//!
//! [`MockBackend`] implements every service trait at once. Tests configure core
//! states and failures up front, drive notifications with [`MockBackend::emit`],
//! and inspect the recorded [`MockCall`] log afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Semaphore};

use crate::{
    service::{BreakpointClient, Connector, DebuggerClient, ServiceRegistry},
    types::{
        BreakpointRequest, CoreId, CoreState, DebugEvent, DebugEventKind, EvaluationResult,
        InstalledBreakpoint, LogEvent, Notification, Result, RpcError, ScopeInfo,
        SessionDescriptor, StackFrameInfo, StepKind, VariableInfo,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect,
    VersionString,
    StartSession(SessionDescriptor),
    LoadModule(String),
    StopSession,
    NumberOfCores,
    CoreState(CoreId),
    StoppedDeliberately(CoreId),
    CoreDescription(CoreId),
    GoCore(CoreId),
    MultiGo,
    StopCore(CoreId),
    Step(Option<CoreId>, StepKind),
    RunToLocation(Option<CoreId>, String),
    Reset,
    StackFrames(CoreId),
    Scopes(i64),
    Variables(i64),
    Evaluate(Option<i64>, String),
    CloseDebugger,
    SetBreakpoint(BreakpointRequest),
    RemoveBreakpoint(u64),
    CloseRegistry,
}

impl MockCall {
    /// Whether the call changes execution state on the target.
    pub fn is_execution_control(&self) -> bool {
        matches!(
            self,
            MockCall::GoCore(_)
                | MockCall::MultiGo
                | MockCall::StopCore(_)
                | MockCall::Step(..)
                | MockCall::RunToLocation(..)
                | MockCall::Reset
        )
    }
}

#[derive(Debug)]
struct State {
    version: String,
    core_states: Vec<CoreState>,
    deliberate: Vec<bool>,
    descriptions: Vec<String>,
    /// Method name to the failure message it replies with.
    failing: HashMap<String, String>,
    fail_connect: Option<String>,
    /// Methods whose calls fail as if the transport had gone away.
    disconnecting: HashSet<String>,
    rejected_locations: HashSet<String>,
    next_breakpoint_id: u64,
    installed: BTreeMap<u64, BreakpointRequest>,
    frames: HashMap<CoreId, Vec<StackFrameInfo>>,
    scopes: HashMap<i64, Vec<ScopeInfo>>,
    variables: HashMap<i64, Vec<VariableInfo>>,
    expressions: HashMap<String, EvaluationResult>,
    /// Stop every core again as soon as an execution-control call returns.
    auto_stop: bool,
    /// When set, `core_state` replies wait for a permit after reading the state.
    core_state_gate: Option<Arc<Semaphore>>,
    events: Option<broadcast::Sender<Notification>>,
    calls: Vec<MockCall>,
}

#[derive(Debug, Clone)]
pub struct MockBackend {
    state: Arc<Mutex<State>>,
}

impl MockBackend {
    /// A backend with `n_cores` stopped cores.
    pub fn new(n_cores: u32) -> Self {
        let (events, _) = broadcast::channel(64);
        let n = n_cores as usize;
        Self {
            state: Arc::new(Mutex::new(State {
                version: "9.50.1".to_owned(),
                core_states: vec![CoreState::Stopped; n],
                deliberate: vec![true; n],
                descriptions: (0..n_cores).map(|core| format!("Core {core}")).collect(),
                failing: HashMap::new(),
                fail_connect: None,
                disconnecting: HashSet::new(),
                rejected_locations: HashSet::new(),
                next_breakpoint_id: 1,
                installed: BTreeMap::new(),
                frames: HashMap::new(),
                scopes: HashMap::new(),
                variables: HashMap::new(),
                expressions: HashMap::new(),
                auto_stop: false,
                core_state_gate: None,
                events: Some(events),
                calls: Vec::new(),
            })),
        }
    }

    pub fn set_core_state(&self, core: CoreId, state: CoreState) {
        self.state.lock().core_states[core as usize] = state;
    }

    pub fn set_stopped_deliberately(&self, core: CoreId, deliberate: bool) {
        self.state.lock().deliberate[core as usize] = deliberate;
    }

    pub fn set_core_description(&self, core: CoreId, description: impl Into<String>) {
        self.state.lock().descriptions[core as usize] = description.into();
    }

    /// Make every subsequent call to `method` fail with `message`.
    ///
    /// Method names match the wire protocol names without the service prefix,
    /// e.g. `goCore`, `startSession`, `setBreakpoint`.
    pub fn fail_method(&self, method: &str, message: impl Into<String>) {
        self.state
            .lock()
            .failing
            .insert(method.to_owned(), message.into());
    }

    /// Make every subsequent call to `method` fail with [`RpcError::ConnectionClosed`].
    pub fn drop_connection_on(&self, method: &str) {
        self.state.lock().disconnecting.insert(method.to_owned());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing.clear();
        state.disconnecting.clear();
    }

    pub fn fail_connect(&self, message: impl Into<String>) {
        self.state.lock().fail_connect = Some(message.into());
    }

    /// Locations the backend accepts but cannot bind to code.
    pub fn reject_location(&self, ule: impl Into<String>) {
        self.state.lock().rejected_locations.insert(ule.into());
    }

    pub fn set_auto_stop(&self, auto_stop: bool) {
        self.state.lock().auto_stop = auto_stop;
    }

    /// Hold back `core_state` replies until the returned semaphore hands out a
    /// permit, one per reply. The state is read before waiting.
    pub fn hold_core_state_replies(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().core_state_gate = Some(gate.clone());
        gate
    }

    pub fn set_stack_frames(&self, core: CoreId, frames: Vec<StackFrameInfo>) {
        self.state.lock().frames.insert(core, frames);
    }

    pub fn set_scopes(&self, frame_id: i64, scopes: Vec<ScopeInfo>) {
        self.state.lock().scopes.insert(frame_id, scopes);
    }

    pub fn set_variables(&self, reference: i64, variables: Vec<VariableInfo>) {
        self.state.lock().variables.insert(reference, variables);
    }

    pub fn set_expression(&self, expression: impl Into<String>, result: EvaluationResult) {
        self.state
            .lock()
            .expressions
            .insert(expression.into(), result);
    }

    pub fn core_state_of(&self, core: CoreId) -> CoreState {
        self.state.lock().core_states[core as usize]
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn installed_breakpoints(&self) -> Vec<BreakpointRequest> {
        self.state.lock().installed.values().cloned().collect()
    }

    /// Push a notification to every subscriber.
    pub fn emit(&self, notification: Notification) {
        if let Some(events) = self.state.lock().events.as_ref() {
            let _ = events.send(notification);
        }
    }

    pub fn emit_debug(&self, kind: DebugEventKind) {
        self.emit(Notification::Debug(DebugEvent::new(kind)));
    }

    pub fn emit_log(&self, text: impl Into<String>) {
        self.emit(Notification::Log(LogEvent { text: text.into() }));
    }

    /// Mark `cores` stopped and push a `CoreStopped` hint.
    pub fn stop_cores(&self, cores: &[CoreId]) {
        {
            let mut state = self.state.lock();
            for &core in cores {
                state.core_states[core as usize] = CoreState::Stopped;
            }
        }
        self.emit_debug(DebugEventKind::CoreStopped);
    }

    /// Drop the notification channel, as a lost transport would.
    pub fn disconnect(&self) {
        self.state.lock().events.take();
    }

    fn record(&self, call: MockCall, method: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.disconnecting.contains(method) {
            return Err(RpcError::ConnectionClosed);
        }
        match state.failing.get(method) {
            Some(message) => Err(RpcError::remote(message.clone())),
            None => Ok(()),
        }
    }

    fn core_index(&self, core: CoreId) -> Result<usize> {
        let index = core as usize;
        if index < self.state.lock().core_states.len() {
            Ok(index)
        } else {
            Err(RpcError::remote(format!("no such core: {core}")))
        }
    }

    fn set_running(&self, core: Option<CoreId>) {
        let auto_stop = {
            let mut state = self.state.lock();
            let target = if state.auto_stop {
                CoreState::Stopped
            } else {
                CoreState::Running
            };
            match core {
                Some(core) => state.core_states[core as usize] = target,
                None => state.core_states.iter_mut().for_each(|s| *s = target),
            }
            state.auto_stop
        };
        if auto_stop {
            self.emit_debug(DebugEventKind::CoreStopped);
        }
    }
}

#[async_trait]
impl DebuggerClient for MockBackend {
    async fn version_string(&self) -> Result<String> {
        self.record(MockCall::VersionString, "getVersionString")?;
        Ok(self.state.lock().version.clone())
    }

    async fn start_session(&self, descriptor: &SessionDescriptor) -> Result<()> {
        self.record(MockCall::StartSession(descriptor.clone()), "startSession")
    }

    async fn load_module(&self, program: &str) -> Result<()> {
        self.record(MockCall::LoadModule(program.to_owned()), "loadModule")
    }

    async fn stop_session(&self) -> Result<()> {
        self.record(MockCall::StopSession, "stopSession")
    }

    async fn number_of_cores(&self) -> Result<u32> {
        self.record(MockCall::NumberOfCores, "getNumberOfCores")?;
        Ok(self.state.lock().core_states.len() as u32)
    }

    async fn core_state(&self, core: CoreId) -> Result<CoreState> {
        self.record(MockCall::CoreState(core), "getCoreState")?;
        let index = self.core_index(core)?;
        let (core_state, gate) = {
            let state = self.state.lock();
            (state.core_states[index], state.core_state_gate.clone())
        };
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        Ok(core_state)
    }

    async fn core_stopped_deliberately(&self, core: CoreId) -> Result<bool> {
        self.record(MockCall::StoppedDeliberately(core), "isCoreStoppedDeliberately")?;
        let index = self.core_index(core)?;
        Ok(self.state.lock().deliberate[index])
    }

    async fn core_description(&self, core: CoreId) -> Result<String> {
        self.record(MockCall::CoreDescription(core), "getCoreDescription")?;
        let index = self.core_index(core)?;
        Ok(self.state.lock().descriptions[index].clone())
    }

    async fn go_core(&self, core: CoreId) -> Result<()> {
        self.record(MockCall::GoCore(core), "goCore")?;
        self.core_index(core)?;
        self.set_running(Some(core));
        Ok(())
    }

    async fn multi_go(&self) -> Result<()> {
        self.record(MockCall::MultiGo, "multiGo")?;
        self.set_running(None);
        Ok(())
    }

    async fn stop_core(&self, core: CoreId) -> Result<()> {
        self.record(MockCall::StopCore(core), "stopCore")?;
        let index = self.core_index(core)?;
        let auto_stop = {
            let mut state = self.state.lock();
            if state.auto_stop {
                state.core_states[index] = CoreState::Stopped;
            }
            state.auto_stop
        };
        if auto_stop {
            self.emit_debug(DebugEventKind::CoreStopped);
        }
        Ok(())
    }

    async fn step(&self, core: Option<CoreId>, kind: StepKind) -> Result<()> {
        self.record(MockCall::Step(core, kind), "step")?;
        if let Some(core) = core {
            self.core_index(core)?;
        }
        self.set_running(core);
        Ok(())
    }

    async fn run_to_location(&self, core: Option<CoreId>, location: &str) -> Result<()> {
        self.record(
            MockCall::RunToLocation(core, location.to_owned()),
            "runToULE",
        )?;
        if let Some(core) = core {
            self.core_index(core)?;
        }
        self.set_running(core);
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.record(MockCall::Reset, "reset")?;
        let mut state = self.state.lock();
        state
            .core_states
            .iter_mut()
            .for_each(|s| *s = CoreState::Stopped);
        Ok(())
    }

    async fn stack_frames(&self, core: CoreId) -> Result<Vec<StackFrameInfo>> {
        self.record(MockCall::StackFrames(core), "getStack")?;
        Ok(self
            .state
            .lock()
            .frames
            .get(&core)
            .cloned()
            .unwrap_or_default())
    }

    async fn scopes(&self, frame_id: i64) -> Result<Vec<ScopeInfo>> {
        self.record(MockCall::Scopes(frame_id), "getScopes")?;
        Ok(self
            .state
            .lock()
            .scopes
            .get(&frame_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn variables(&self, variables_reference: i64) -> Result<Vec<VariableInfo>> {
        self.record(MockCall::Variables(variables_reference), "getVariables")?;
        Ok(self
            .state
            .lock()
            .variables
            .get(&variables_reference)
            .cloned()
            .unwrap_or_default())
    }

    async fn evaluate(&self, frame_id: Option<i64>, expression: &str) -> Result<EvaluationResult> {
        self.record(
            MockCall::Evaluate(frame_id, expression.to_owned()),
            "evaluate",
        )?;
        self.state
            .lock()
            .expressions
            .get(expression)
            .cloned()
            .ok_or_else(|| RpcError::remote(format!("Unknown symbol: {expression}")))
    }

    async fn close(&self) {
        let _ = self.record(MockCall::CloseDebugger, "close");
    }
}

#[async_trait]
impl BreakpointClient for MockBackend {
    async fn set_breakpoint(&self, request: &BreakpointRequest) -> Result<InstalledBreakpoint> {
        self.record(MockCall::SetBreakpoint(request.clone()), "setBreakpoint")?;
        let mut state = self.state.lock();
        let id = state.next_breakpoint_id;
        state.next_breakpoint_id += 1;
        let valid = !state.rejected_locations.contains(&request.ule);
        if valid {
            state.installed.insert(id, request.clone());
        }
        Ok(InstalledBreakpoint {
            id,
            ule: request.ule.clone(),
            valid,
            message: (!valid).then(|| format!("No code at {}", request.ule)),
        })
    }

    async fn remove_breakpoint(&self, id: u64) -> Result<()> {
        self.record(MockCall::RemoveBreakpoint(id), "removeBreakpoint")?;
        self.state.lock().installed.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for MockBackend {
    async fn debugger(&self) -> Result<Arc<dyn DebuggerClient>> {
        Ok(Arc::new(self.clone()))
    }

    async fn breakpoints(&self) -> Result<Arc<dyn BreakpointClient>> {
        Ok(Arc::new(self.clone()))
    }

    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        match self.state.lock().events.as_ref() {
            Some(events) => events.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    async fn close(&self) {
        let _ = self.record(MockCall::CloseRegistry, "closeRegistry");
        self.disconnect();
    }
}

#[async_trait]
impl Connector for MockBackend {
    async fn connect(&self, _descriptor: &SessionDescriptor) -> Result<Arc<dyn ServiceRegistry>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Connect);
        if let Some(message) = state.fail_connect.clone() {
            return Err(RpcError::remote(message));
        }
        // Every connection gets a live notification channel, even after a disconnect.
        if state.events.is_none() {
            state.events = Some(broadcast::channel(64).0);
        }
        Ok(Arc::new(self.clone()))
    }
}

//! Session lifecycle.
//!
//! A session moves through [`SessionPhase`]s. `launch` connects to the backend,
//! starts the backend session and wires up the per-session services, then waits
//! in `Configuring` for `configurationDone` (or the server's deadline) before the
//! program is run. Everything built during launch is registered on a teardown
//! stack and released in reverse order, so no service outlives the transport it
//! talks through.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use cspy_rpc::{Connector, CoreId, DebugEventKind, DebuggerClient, SessionDescriptor};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::breakpoints::{
    driver_from_name, initialize_breakpoint_modes, register_breakpoint_extensions,
    BreakpointCapability, BreakpointDefaults, BreakpointManager,
};
use crate::command_registry::{ConsoleCommandRegistry, CustomRequestRegistry};
use crate::dap::messages::Request;
use crate::dap::types::{
    CompletionItem, CompletionsArguments, ContinueArguments, EvaluateArguments,
    EvaluateResponseBody, PauseArguments, Scope, ScopesArguments, SetBreakpointsArguments, Source,
    StackFrame, StackTraceArguments, StepArguments, StoppedEventBody, Thread, Variable,
    VariablesArguments,
};
use crate::error::{SessionError, SessionResult};
use crate::event_listener::EventListenerHandler;
use crate::launch::{InitialRun, LaunchArguments, LaunchResolver};
use crate::multicore::Multicore;
use crate::outbound::{to_body, EventSink};
use crate::run_control::{CoreStoppedEvent, RunControlError, RunControlService};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Launching,
    Configuring,
    Live,
    Terminating,
    Terminated,
}

impl SessionPhase {
    /// Phases in which session requests are served.
    pub fn is_active(self) -> bool {
        matches!(self, SessionPhase::Configuring | SessionPhase::Live)
    }
}

/// Session-level happenings reported from background tasks.
#[derive(Debug)]
pub enum SessionSignal {
    CoresStopped(Vec<CoreStoppedEvent>),
    /// The backend reported a fatal error; `message` is shown to the user when present.
    Fatal { message: Option<String> },
    ConnectionLost,
}

/// Whether the server keeps reading requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

type TeardownStep = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Default)]
struct TeardownStack {
    steps: Vec<(&'static str, TeardownStep)>,
}

impl TeardownStack {
    fn push<F, Fut>(&mut self, name: &'static str, step: F)
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.steps.push((name, Box::new(move || step().boxed())));
    }

    async fn unwind(&mut self) {
        while let Some((name, step)) = self.steps.pop() {
            tracing::debug!(target: "cspy.dap", step = name, "tearing down");
            step().await;
        }
    }
}

struct Session {
    debugger: Arc<dyn DebuggerClient>,
    n_cores: u32,
    run_control: Arc<RunControlService>,
    breakpoints: BreakpointManager,
    multicore: Arc<Multicore>,
    console: ConsoleCommandRegistry,
    custom: CustomRequestRegistry,
    initial_run: InitialRun,
    trace: bool,
    teardown: TeardownStack,
}

pub struct SessionOrchestrator {
    phase: SessionPhase,
    session: Option<Session>,
    /// The launch request, answered once configuration is done.
    pending_launch: Option<Request>,
    sink: EventSink,
    signals: mpsc::UnboundedSender<SessionSignal>,
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn LaunchResolver>,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("phase", &self.phase)
            .field("has_session", &self.session.is_some())
            .finish()
    }
}

impl SessionOrchestrator {
    pub fn new(
        sink: EventSink,
        signals: mpsc::UnboundedSender<SessionSignal>,
        connector: Arc<dyn Connector>,
        resolver: Arc<dyn LaunchResolver>,
    ) -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            session: None,
            pending_launch: None,
            sink,
            signals,
            connector,
            resolver,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Launched and waiting for `configurationDone`.
    pub fn awaiting_configuration(&self) -> bool {
        self.phase == SessionPhase::Configuring && self.pending_launch.is_some()
    }

    fn transition(&mut self, from: &[SessionPhase], to: SessionPhase) -> SessionResult<()> {
        if !from.contains(&self.phase) {
            tracing::error!(
                target: "cspy.dap",
                from = ?self.phase,
                to = ?to,
                "invalid session transition"
            );
            return Err(SessionError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        tracing::debug!(target: "cspy.dap", from = ?self.phase, to = ?to, "session phase");
        self.phase = to;
        Ok(())
    }

    pub async fn handle_request(&mut self, request: Request) -> Flow {
        if self.session.as_ref().is_some_and(|session| session.trace) {
            tracing::info!(
                target: "cspy.dap.trace",
                seq = request.seq,
                command = %request.command,
                arguments = %request.arguments,
                "request"
            );
        }

        match request.command.as_str() {
            "initialize" => self.sink.respond_ok(&request, Some(capabilities())),
            "launch" => self.launch(request).await,
            "configurationDone" => match self.phase {
                SessionPhase::Configuring => {
                    self.sink.respond_ok(&request, None);
                    self.finish_configuration().await;
                }
                SessionPhase::Live => self.sink.respond_ok(&request, None),
                _ => self
                    .sink
                    .respond_err(&request, SessionError::NoActiveSession.to_string()),
            },
            "terminate" => {
                if self.session.is_none() {
                    self.sink
                        .respond_err(&request, SessionError::NoActiveSession.to_string());
                    return Flow::Continue;
                }
                self.sink.respond_ok(&request, None);
                self.sink.output("Shutting down C-SPY...");
                self.end_session().await;
                self.sink.terminated();
            }
            "disconnect" => {
                self.end_session().await;
                self.sink.respond_ok(&request, None);
                return Flow::Exit;
            }
            _ => match self.dispatch(&request).await {
                Ok(body) => self.sink.respond_ok(&request, body),
                Err(err) if err.is_connection_lost() => {
                    tracing::warn!(
                        target: "cspy.dap",
                        command = %request.command,
                        error = %err,
                        "lost connection to the backend"
                    );
                    self.sink.respond_err(&request, err.to_string());
                    self.end_session().await;
                    self.sink.terminated();
                }
                Err(err) => {
                    tracing::debug!(
                        target: "cspy.dap",
                        command = %request.command,
                        error = %err,
                        "request failed"
                    );
                    self.sink.respond_err(&request, err.to_string());
                }
            },
        }
        Flow::Continue
    }

    pub async fn handle_signal(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::CoresStopped(batch) => {
                if let Some(session) = self.session.as_ref().filter(|_| self.phase.is_active()) {
                    session.report_stops(&self.sink, batch);
                }
            }
            SessionSignal::Fatal { message } => {
                if self.session.is_none() {
                    return;
                }
                tracing::error!(target: "cspy.dap", message = ?message, "backend reported a fatal error");
                if let Some(message) = message {
                    self.sink.output(message);
                }
                self.end_session().await;
                self.sink.terminated();
            }
            SessionSignal::ConnectionLost => {
                if self.session.is_none() {
                    return;
                }
                tracing::warn!(target: "cspy.dap", "lost connection to the backend");
                self.end_session().await;
                self.sink.terminated();
            }
        }
    }

    /// End any active session. Used when the client goes away without `disconnect`.
    pub async fn shutdown(&mut self) {
        self.end_session().await;
    }

    /// The client never sent `configurationDone`; proceed anyway.
    pub async fn configuration_deadline_elapsed(&mut self) {
        if !self.awaiting_configuration() {
            return;
        }
        tracing::warn!(
            target: "cspy.dap",
            "configurationDone not received in time; starting the program anyway"
        );
        self.finish_configuration().await;
    }

    async fn launch(&mut self, request: Request) {
        if let Err(err) = self.transition(&[SessionPhase::Uninitialized], SessionPhase::Launching) {
            self.sink.respond_err(&request, err.to_string());
            return;
        }

        match self.establish(&request.arguments).await {
            Ok(session) => {
                if let Err(err) =
                    self.transition(&[SessionPhase::Launching], SessionPhase::Configuring)
                {
                    session.teardown().await;
                    self.sink.respond_err(&request, err.to_string());
                    return;
                }
                self.session = Some(session);
                self.pending_launch = Some(request);
                self.sink.send_event("initialized", None);
            }
            Err(err) => {
                tracing::warn!(target: "cspy.dap", error = %err, "launch failed");
                if let Err(err) =
                    self.transition(&[SessionPhase::Launching], SessionPhase::Uninitialized)
                {
                    self.sink.respond_err(&request, err.to_string());
                    return;
                }
                self.sink.respond_err(&request, err.launch_message());
            }
        }
    }

    /// Resolve the launch arguments and bring up a session, undoing every
    /// completed step if a later one fails.
    async fn establish(&mut self, arguments: &Value) -> SessionResult<Session> {
        let args = LaunchArguments::from_value(arguments)?;
        let descriptor = self.resolver.resolve(&args)?;
        tracing::info!(
            target: "cspy.dap",
            program = %descriptor.program.display(),
            driver = %descriptor.driver,
            n_cores = descriptor.n_cores,
            "starting session"
        );

        let mut teardown = TeardownStack::default();
        match self.start(&args, &descriptor, &mut teardown).await {
            Ok(session) => Ok(session),
            Err(err) => {
                teardown.unwind().await;
                Err(err)
            }
        }
    }

    async fn start(
        &self,
        args: &LaunchArguments,
        descriptor: &SessionDescriptor,
        teardown: &mut TeardownStack,
    ) -> SessionResult<Session> {
        let registry = self.connector.connect(descriptor).await?;
        teardown.push("service registry", {
            let registry = registry.clone();
            move || async move { registry.close().await }
        });
        let notifications = registry.subscribe();

        let debugger = registry.debugger().await?;
        teardown.push("debugger client", {
            let debugger = debugger.clone();
            move || async move { debugger.close().await }
        });

        let version = debugger.version_string().await?;
        self.sink.output(format!("Using C-SPY version: {version}"));

        debugger.start_session(descriptor).await?;
        teardown.push("backend session", {
            let debugger = debugger.clone();
            move || async move {
                if let Err(err) = debugger.stop_session().await {
                    tracing::debug!(target: "cspy.dap", error = %err, "failed to stop backend session");
                }
            }
        });

        debugger
            .load_module(&descriptor.program.to_string_lossy())
            .await?;

        let n_cores = match debugger.number_of_cores().await? {
            0 => descriptor.n_cores.max(1),
            n => n,
        };

        let breakpoint_client = registry.breakpoints().await?;
        let driver = driver_from_name(
            &descriptor.driver,
            &descriptor.target,
            &descriptor.driver_options,
        );
        let capability = BreakpointCapability::for_driver(driver)?;
        let defaults = Arc::new(BreakpointDefaults::new(
            capability,
            args.requested_breakpoint_type(),
            args.requested_breakpoint_mode(),
        ));

        let mut console = ConsoleCommandRegistry::new();
        let mut custom = CustomRequestRegistry::new();
        register_breakpoint_extensions(defaults.clone(), self.sink.clone(), &mut console, &mut custom);
        let multicore = Multicore::new(n_cores, args.lockstep());
        multicore.register(&mut custom);

        let hub = Arc::new(EventListenerHandler::new());
        hub.observe_log_events({
            let sink = self.sink.clone();
            move |event| sink.output(event.text.clone())
        });
        for kind in [DebugEventKind::FatalError, DebugEventKind::SilentFatalError] {
            let signals = self.signals.clone();
            hub.observe_debug_events(kind, move |event| {
                let message = match event.kind {
                    DebugEventKind::SilentFatalError => None,
                    _ => event.message.clone(),
                };
                let _ = signals.send(SessionSignal::Fatal { message });
            });
        }

        let run_control = Arc::new(RunControlService::new(debugger.clone(), n_cores));
        run_control.attach(hub.clone(), {
            let signals = self.signals.clone();
            move |batch| {
                let _ = signals.send(SessionSignal::CoresStopped(batch));
            }
        });
        teardown.push("run control", {
            let run_control = run_control.clone();
            move || async move { run_control.dispose() }
        });

        let pump = tokio::spawn({
            let hub = hub.clone();
            let signals = self.signals.clone();
            async move {
                hub.pump(notifications).await;
                let _ = signals.send(SessionSignal::ConnectionLost);
            }
        });
        teardown.push("notification pump", move || async move {
            pump.abort();
            hub.clear();
        });

        Ok(Session {
            debugger,
            n_cores,
            run_control,
            breakpoints: BreakpointManager::new(breakpoint_client, defaults),
            multicore,
            console,
            custom,
            initial_run: args.initial_run(),
            trace: args.trace,
            teardown: std::mem::take(teardown),
        })
    }

    async fn finish_configuration(&mut self) {
        let Some(request) = self.pending_launch.take() else {
            return;
        };
        if self
            .transition(&[SessionPhase::Configuring], SessionPhase::Live)
            .is_err()
        {
            return;
        }
        self.sink.output("Session started");
        self.sink.respond_ok(&request, None);

        let Some(session) = self.session.as_ref() else {
            return;
        };
        if let Err(err) = session.run_initially(&self.sink).await {
            tracing::warn!(target: "cspy.dap", error = %err, "initial run failed");
            self.sink.output(format!("Failed to start the program: {err}"));
        }
    }

    async fn end_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        // A session only exists while Configuring or Live; teardown runs regardless.
        let _ = self.transition(
            &[SessionPhase::Configuring, SessionPhase::Live],
            SessionPhase::Terminating,
        );
        if let Some(request) = self.pending_launch.take() {
            self.sink
                .respond_err(&request, "Session ended before configuration completed");
        }
        session.teardown().await;
        let _ = self.transition(&[SessionPhase::Terminating], SessionPhase::Terminated);
        tracing::info!(target: "cspy.dap", "session terminated");
    }

    async fn dispatch(&mut self, request: &Request) -> SessionResult<Option<Value>> {
        let phase = self.phase;
        let session = match self.session.as_mut() {
            Some(session) if phase.is_active() => session,
            _ => return Err(SessionError::NoActiveSession),
        };
        session.handle(&request.command, &request.arguments).await
    }
}

fn capabilities() -> Value {
    json!({
        "supportsConfigurationDoneRequest": true,
        "supportsTerminateRequest": true,
        "supportsRestartRequest": true,
        "supportsConditionalBreakpoints": true,
        "supportsHitConditionalBreakpoints": true,
        "supportsLogPoints": true,
        "supportsSteppingGranularity": true,
        "supportsSingleThreadExecutionRequests": true,
        "supportsEvaluateForHovers": true,
        "supportsCompletionsRequest": true,
        "supportsSetVariable": false,
        "supportsStepBack": false,
        "breakpointModes": initialize_breakpoint_modes(),
    })
}

fn parse<T: DeserializeOwned>(command: &str, arguments: &Value) -> SessionResult<T> {
    serde_json::from_value(arguments.clone()).map_err(|err| SessionError::InvalidArguments {
        command: command.to_owned(),
        message: err.to_string(),
    })
}

impl Session {
    async fn handle(&mut self, command: &str, arguments: &Value) -> SessionResult<Option<Value>> {
        match command {
            "setBreakpoints" => {
                let args: SetBreakpointsArguments = parse(command, arguments)?;
                let breakpoints = self.breakpoints.set_breakpoints(&args).await?;
                Ok(Some(json!({ "breakpoints": breakpoints })))
            }
            "threads" => Ok(Some(json!({ "threads": self.threads().await }))),
            "continue" => {
                let args: ContinueArguments = parse(command, arguments)?;
                let single_thread = self.multicore.single_thread(args.single_thread);
                let target = self.multicore.target(args.thread_id, args.single_thread);
                self.run_control.continue_(target).await?;
                Ok(Some(json!({ "allThreadsContinued": !single_thread })))
            }
            "next" | "stepIn" | "stepOut" => {
                let args: StepArguments = parse(command, arguments)?;
                let target = self.multicore.target(args.thread_id, args.single_thread);
                let granularity = args.granularity.unwrap_or_default();
                match command {
                    "next" => self.run_control.next(target, granularity).await?,
                    "stepIn" => self.run_control.step_in(target, granularity).await?,
                    _ => self.run_control.step_out(target).await?,
                }
                Ok(None)
            }
            "pause" => {
                let args: PauseArguments = parse(command, arguments)?;
                let target = self.multicore.target(args.thread_id, None);
                self.run_control.pause(target).await?;
                Ok(None)
            }
            "restart" => {
                self.run_control.reset().await?;
                Ok(None)
            }
            "stackTrace" => {
                let args: StackTraceArguments = parse(command, arguments)?;
                self.stack_trace(&args).await.map(Some)
            }
            "scopes" => {
                let args: ScopesArguments = parse(command, arguments)?;
                let scopes: Vec<Scope> = self
                    .debugger
                    .scopes(args.frame_id)
                    .await?
                    .into_iter()
                    .map(|scope| Scope {
                        name: scope.name,
                        variables_reference: scope.variables_reference,
                        expensive: false,
                    })
                    .collect();
                Ok(Some(json!({ "scopes": scopes })))
            }
            "variables" => {
                let args: VariablesArguments = parse(command, arguments)?;
                let variables: Vec<Variable> = self
                    .debugger
                    .variables(args.variables_reference)
                    .await?
                    .into_iter()
                    .map(|variable| Variable {
                        name: variable.name,
                        value: variable.value,
                        type_name: variable.type_name,
                        variables_reference: variable.variables_reference,
                    })
                    .collect();
                Ok(Some(json!({ "variables": variables })))
            }
            "evaluate" => {
                let args: EvaluateArguments = parse(command, arguments)?;
                self.evaluate(&args).await.map(Some)
            }
            "completions" => {
                let args: CompletionsArguments = parse(command, arguments)?;
                Ok(Some(json!({ "targets": self.completions(&args) })))
            }
            other => {
                let body = self.custom.run_command(other, arguments.clone()).await?;
                Ok((!body.is_null()).then_some(body))
            }
        }
    }

    fn core(&self, thread_id: i64) -> SessionResult<CoreId> {
        match CoreId::try_from(thread_id) {
            Ok(core) if core < self.n_cores => Ok(core),
            _ => Err(RunControlError::NoSuchCore(thread_id.clamp(0, i64::from(u32::MAX)) as CoreId).into()),
        }
    }

    async fn threads(&self) -> Vec<Thread> {
        let debugger = &self.debugger;
        let descriptions = join_all((0..self.n_cores).map(|core| debugger.core_description(core))).await;
        (0..self.n_cores)
            .zip(descriptions)
            .map(|(core, description)| {
                let description = description.unwrap_or_else(|err| {
                    tracing::debug!(target: "cspy.dap", core, error = %err, "no core description");
                    format!("Core {core}")
                });
                Thread {
                    id: i64::from(core),
                    name: format!("{core}: {description}"),
                }
            })
            .collect()
    }

    async fn stack_trace(&self, args: &StackTraceArguments) -> SessionResult<Value> {
        let core = self.core(args.thread_id)?;
        let frames = self.debugger.stack_frames(core).await?;
        let total = frames.len();
        let start = args.start_frame.unwrap_or(0).min(total);
        let levels = args.levels.filter(|&levels| levels > 0).unwrap_or(total);
        let frames: Vec<StackFrame> = frames
            .into_iter()
            .skip(start)
            .take(levels)
            .map(|frame| StackFrame {
                id: frame.id,
                name: frame.name,
                source: frame.source_path.map(|path| Source {
                    name: Path::new(&path)
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned()),
                    path: Some(path),
                }),
                line: frame.line,
                column: frame.column,
            })
            .collect();
        Ok(json!({ "stackFrames": frames, "totalFrames": total }))
    }

    async fn evaluate(&self, args: &EvaluateArguments) -> SessionResult<Value> {
        let expression = args.expression.trim();
        if args.context.as_deref() == Some("repl") && self.console.has_command(expression) {
            let result = self.console.run_command(expression, ()).await?;
            return Ok(to_body(&EvaluateResponseBody {
                result,
                type_name: None,
                variables_reference: 0,
            }));
        }
        let result = self.debugger.evaluate(args.frame_id, &args.expression).await?;
        Ok(to_body(&EvaluateResponseBody {
            result: result.value,
            type_name: result.type_name,
            variables_reference: result.variables_reference,
        }))
    }

    fn completions(&self, args: &CompletionsArguments) -> Vec<CompletionItem> {
        let typed: String = args
            .text
            .chars()
            .take((args.column - 1).max(0) as usize)
            .collect();
        let prefix = typed.trim_start();
        self.console
            .command_names()
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| CompletionItem {
                label: name.to_owned(),
                item_type: "function",
            })
            .collect()
    }

    async fn run_initially(&self, sink: &EventSink) -> SessionResult<()> {
        match &self.initial_run {
            InitialRun::StopImmediately => sink.stopped(StoppedEventBody {
                reason: "entry".to_owned(),
                thread_id: 0,
                all_threads_stopped: true,
            }),
            InitialRun::RunTo(location) => {
                self.run_control.run_to_location(None, location).await?
            }
            InitialRun::Continue => self.run_control.continue_(None).await?,
        }
        Ok(())
    }

    /// Turn one reconciliation batch into `stopped` events.
    ///
    /// When every core stopped together, one all-threads event is sent, focused on
    /// the first core that stopped on its own. Otherwise each core is reported
    /// separately, sympathetic stops first so a deliberate stop ends up focused.
    fn report_stops(&self, sink: &EventSink, mut batch: Vec<CoreStoppedEvent>) {
        if batch.len() >= self.n_cores as usize {
            let focus = batch
                .iter()
                .find(|event| event.stopped_deliberately)
                .or_else(|| batch.first());
            if let Some(focus) = focus {
                sink.stopped(StoppedEventBody {
                    reason: focus.reason.as_str().to_owned(),
                    thread_id: i64::from(focus.core),
                    all_threads_stopped: true,
                });
            }
            return;
        }

        batch.sort_by_key(|event| event.stopped_deliberately);
        for event in batch {
            sink.stopped(StoppedEventBody {
                reason: event.reason.as_str().to_owned(),
                thread_id: i64::from(event.core),
                all_threads_stopped: false,
            });
        }
    }

    async fn teardown(mut self) {
        self.breakpoints.dispose();
        self.teardown.unwind().await;
    }
}

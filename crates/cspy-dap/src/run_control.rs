//! Execution control across the cores of a session.
//!
//! Every execution-control operation records why the affected cores are expected
//! to stop next, then issues the backend call. The backend's "core stopped"
//! notification does not say which core stopped, so [`RunControlService::reconcile`]
//! re-polls every core and reports each stopped core that still had an expected
//! reason, removing the entry. A core without an entry is already known to be
//! stopped and is never reported twice.
//!
//! Each core also carries a generation that moves whenever an execution-control
//! call touches its entry. A poll only consumes an entry whose generation is the
//! one it saw before polling; a stale "stopped" answer cannot eat the entry of a
//! command issued while the poll was in flight.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use cspy_rpc::{CoreId, DebugEventKind, DebuggerClient, RpcError, StepKind};
use futures::future::join_all;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::dap::types::SteppingGranularity;
use crate::event_listener::{EventListenerHandler, SubscriptionId};

/// Conventional location for the initial run and for restarts.
pub const ENTRY_LOCATION: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    Entry,
    Exit,
    Breakpoint,
    Step,
    Pause,
}

impl StopReason {
    /// The `reason` of the DAP `stopped` event.
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Entry => "entry",
            StopReason::Exit => "exit",
            StopReason::Breakpoint => "breakpoint",
            StopReason::Step => "step",
            StopReason::Pause => "pause",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreStoppedEvent {
    pub core: CoreId,
    pub reason: StopReason,
    /// `false` when the core only stopped to synchronize with another core.
    pub stopped_deliberately: bool,
}

#[derive(Debug, Error)]
pub enum RunControlError {
    #[error("Invalid thread id {0}")]
    NoSuchCore(CoreId),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

struct Attachment {
    hub: Arc<EventListenerHandler>,
    subscriptions: Vec<SubscriptionId>,
    task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct ExpectedStops {
    reasons: BTreeMap<CoreId, StopReason>,
    generations: BTreeMap<CoreId, u64>,
}

impl ExpectedStops {
    fn record(&mut self, core: CoreId, reason: StopReason) -> Option<StopReason> {
        self.bump(core);
        self.reasons.insert(core, reason)
    }

    fn bump(&mut self, core: CoreId) {
        *self.generations.entry(core).or_default() += 1;
    }

    fn generation(&self, core: CoreId) -> u64 {
        self.generations.get(&core).copied().unwrap_or(0)
    }
}

pub struct RunControlService {
    debugger: Arc<dyn DebuggerClient>,
    n_cores: u32,
    expected: Mutex<ExpectedStops>,
    attachment: Mutex<Option<Attachment>>,
}

impl fmt::Debug for RunControlService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunControlService")
            .field("n_cores", &self.n_cores)
            .field("expected", &self.expected.lock().reasons)
            .finish()
    }
}

impl RunControlService {
    pub fn new(debugger: Arc<dyn DebuggerClient>, n_cores: u32) -> Self {
        Self {
            debugger,
            n_cores,
            expected: Mutex::new(ExpectedStops::default()),
            attachment: Mutex::new(None),
        }
    }

    pub fn n_cores(&self) -> u32 {
        self.n_cores
    }

    pub fn expected_reason(&self, core: CoreId) -> Option<StopReason> {
        self.expected.lock().reasons.get(&core).copied()
    }

    pub async fn next(
        &self,
        core: Option<CoreId>,
        granularity: SteppingGranularity,
    ) -> Result<(), RunControlError> {
        let kind = match granularity {
            SteppingGranularity::Instruction => StepKind::InstructionOver,
            _ => StepKind::Over,
        };
        self.issue(core, StopReason::Step, self.debugger.step(core, kind))
            .await
    }

    pub async fn step_in(
        &self,
        core: Option<CoreId>,
        granularity: SteppingGranularity,
    ) -> Result<(), RunControlError> {
        let kind = match granularity {
            SteppingGranularity::Instruction => StepKind::InstructionInto,
            _ => StepKind::Into,
        };
        self.issue(core, StopReason::Step, self.debugger.step(core, kind))
            .await
    }

    pub async fn step_out(&self, core: Option<CoreId>) -> Result<(), RunControlError> {
        self.issue(core, StopReason::Step, self.debugger.step(core, StepKind::Out))
            .await
    }

    /// Resume one core, or every core in a single multi-go.
    pub async fn continue_(&self, core: Option<CoreId>) -> Result<(), RunControlError> {
        match core {
            Some(core) => {
                self.issue(Some(core), StopReason::Breakpoint, self.debugger.go_core(core))
                    .await
            }
            None => {
                self.issue(None, StopReason::Breakpoint, self.debugger.multi_go())
                    .await
            }
        }
    }

    /// Ask the affected cores to stop. Issued even if a core is already stopped.
    pub async fn pause(&self, core: Option<CoreId>) -> Result<(), RunControlError> {
        let cores = self.affected(core)?;
        let debugger = &self.debugger;
        let stop_all = async {
            join_all(cores.iter().map(|&core| debugger.stop_core(core)))
                .await
                .into_iter()
                .collect::<Result<Vec<()>, RpcError>>()
                .map(|_| ())
        };
        self.issue(core, StopReason::Pause, stop_all).await
    }

    pub async fn run_to_location(
        &self,
        core: Option<CoreId>,
        location: &str,
    ) -> Result<(), RunControlError> {
        self.issue(
            core,
            StopReason::Entry,
            self.debugger.run_to_location(core, location),
        )
        .await
    }

    /// Reset the target and run to [`ENTRY_LOCATION`].
    pub async fn reset(&self) -> Result<(), RunControlError> {
        self.debugger.reset().await?;
        // Reset stops every core; nothing that was pending is going to be reported.
        {
            let mut expected = self.expected.lock();
            expected.reasons.clear();
            for core in 0..self.n_cores {
                expected.bump(core);
            }
        }
        self.run_to_location(None, ENTRY_LOCATION).await
    }

    /// Program exit: whatever stops next stopped because the program ended.
    pub fn mark_all_exit(&self) {
        let mut expected = self.expected.lock();
        for core in 0..self.n_cores {
            expected.record(core, StopReason::Exit);
        }
    }

    /// Poll every core and report the stops that were expected.
    ///
    /// Polls run concurrently and are joined before any entry is removed, so one
    /// call yields a consistent snapshot across cores. A failed poll skips that core,
    /// and so does a core whose entry changed while the poll was in flight.
    pub async fn reconcile(&self) -> Vec<CoreStoppedEvent> {
        let debugger = &self.debugger;
        let seen: Vec<u64> = {
            let expected = self.expected.lock();
            (0..self.n_cores).map(|core| expected.generation(core)).collect()
        };
        let states = join_all((0..self.n_cores).map(|core| debugger.core_state(core))).await;

        let stopped: Vec<(CoreId, StopReason)> = {
            let mut expected = self.expected.lock();
            (0..self.n_cores)
                .zip(seen)
                .zip(states)
                .filter_map(|((core, seen), state)| match state {
                    Ok(state) if state.is_stopped() => {
                        if expected.generation(core) != seen {
                            tracing::trace!(
                                target: "cspy.dap.run_control",
                                core,
                                "core was commanded during the poll; leaving its entry"
                            );
                            return None;
                        }
                        expected.reasons.remove(&core).map(|reason| (core, reason))
                    }
                    Ok(_) => None,
                    Err(err) => {
                        tracing::warn!(
                            target: "cspy.dap.run_control",
                            core,
                            error = %err,
                            "failed to poll core state"
                        );
                        None
                    }
                })
                .collect()
        };

        let deliberate = join_all(
            stopped
                .iter()
                .map(|&(core, _)| debugger.core_stopped_deliberately(core)),
        )
        .await;

        stopped
            .into_iter()
            .zip(deliberate)
            .map(|((core, reason), deliberate)| {
                let stopped_deliberately = deliberate.unwrap_or_else(|err| {
                    tracing::warn!(
                        target: "cspy.dap.run_control",
                        core,
                        error = %err,
                        "failed to query deliberate stop; assuming deliberate"
                    );
                    true
                });
                tracing::debug!(
                    target: "cspy.dap.run_control",
                    core,
                    %reason,
                    stopped_deliberately,
                    "core stopped"
                );
                CoreStoppedEvent {
                    core,
                    reason,
                    stopped_deliberately,
                }
            })
            .collect()
    }

    /// Subscribe to the hub and report stop batches through `on_stopped`.
    ///
    /// Stop notifications are reconciled one at a time on a dedicated task;
    /// notifications arriving during a poll are coalesced into the next one.
    pub fn attach<F>(self: &Arc<Self>, hub: Arc<EventListenerHandler>, on_stopped: F)
    where
        F: Fn(Vec<CoreStoppedEvent>) + Send + Sync + 'static,
    {
        let (trigger, mut triggers) = mpsc::unbounded_channel::<()>();
        let stopped = hub.observe_debug_events(DebugEventKind::CoreStopped, move |_| {
            let _ = trigger.send(());
        });

        let weak: Weak<Self> = Arc::downgrade(self);
        let exited = hub.observe_debug_events(DebugEventKind::ProgramExit, move |_| {
            if let Some(this) = weak.upgrade() {
                this.mark_all_exit();
            }
        });

        let this = self.clone();
        let task = tokio::spawn(async move {
            while triggers.recv().await.is_some() {
                while triggers.try_recv().is_ok() {}
                let events = this.reconcile().await;
                if !events.is_empty() {
                    on_stopped(events);
                }
            }
        });

        let previous = self.attachment.lock().replace(Attachment {
            hub,
            subscriptions: vec![stopped, exited],
            task,
        });
        if let Some(previous) = previous {
            Self::detach(previous);
        }
    }

    /// Unsubscribe from the hub and stop reconciling.
    pub fn dispose(&self) {
        if let Some(attachment) = self.attachment.lock().take() {
            Self::detach(attachment);
        }
    }

    fn detach(attachment: Attachment) {
        for id in attachment.subscriptions {
            attachment.hub.unobserve(id);
        }
        attachment.task.abort();
    }

    fn affected(&self, core: Option<CoreId>) -> Result<Vec<CoreId>, RunControlError> {
        match core {
            Some(core) if core >= self.n_cores => Err(RunControlError::NoSuchCore(core)),
            Some(core) => Ok(vec![core]),
            None => Ok((0..self.n_cores).collect()),
        }
    }

    /// Record `reason` for the affected cores, then await `call`.
    ///
    /// The entries are in place before the call can complete, so a stop racing
    /// the reply is still matched. On failure the previous entries come back.
    async fn issue<Fut>(
        &self,
        core: Option<CoreId>,
        reason: StopReason,
        call: Fut,
    ) -> Result<(), RunControlError>
    where
        Fut: Future<Output = Result<(), RpcError>>,
    {
        let cores = self.affected(core)?;
        let previous: Vec<(CoreId, Option<StopReason>)> = {
            let mut expected = self.expected.lock();
            cores
                .iter()
                .map(|&core| (core, expected.record(core, reason)))
                .collect()
        };

        match call.await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut expected = self.expected.lock();
                for (core, before) in previous {
                    match before {
                        Some(before) => expected.reasons.insert(core, before),
                        None => expected.reasons.remove(&core),
                    };
                }
                tracing::debug!(
                    target: "cspy.dap.run_control",
                    ?core,
                    %reason,
                    error = %err,
                    "execution control failed"
                );
                Err(err.into())
            }
        }
    }
}

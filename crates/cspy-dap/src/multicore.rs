//! Lockstep handling for multicore sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cspy_rpc::CoreId;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::command_registry::{json_guard, CustomRequestRegistry};

#[derive(Debug, Deserialize)]
struct SetLockstepModeArguments {
    enabled: bool,
}

/// Whether execution control on one core applies to all of them.
#[derive(Debug)]
pub struct Multicore {
    n_cores: u32,
    lockstep: AtomicBool,
}

impl Multicore {
    pub fn new(n_cores: u32, lockstep: bool) -> Arc<Self> {
        Arc::new(Self {
            n_cores,
            lockstep: AtomicBool::new(lockstep),
        })
    }

    pub fn lockstep(&self) -> bool {
        self.lockstep.load(Ordering::SeqCst)
    }

    pub fn set_lockstep(&self, enabled: bool) {
        self.lockstep.store(enabled, Ordering::SeqCst);
        tracing::info!(target: "cspy.dap", enabled, "multicore lockstep mode changed");
    }

    /// Whether a request applies to its thread only. Absent means "not lockstep".
    pub fn single_thread(&self, requested: Option<bool>) -> bool {
        requested.unwrap_or_else(|| !self.lockstep())
    }

    /// The core a request targets; `None` means all cores.
    pub fn target(&self, thread_id: i64, single_thread: Option<bool>) -> Option<CoreId> {
        if self.single_thread(single_thread) {
            Some(thread_id.clamp(0, i64::from(u32::MAX)) as CoreId)
        } else {
            None
        }
    }

    /// Expose `setLockstepModeEnabled`. Single-core sessions get nothing.
    pub fn register(self: &Arc<Self>, custom: &mut CustomRequestRegistry) {
        if self.n_cores <= 1 {
            return;
        }
        let this = self.clone();
        custom.register_command_with_type_check(
            "setLockstepModeEnabled",
            json_guard::<SetLockstepModeArguments>(),
            move |args: SetLockstepModeArguments| {
                this.set_lockstep(args.enabled);
                let body = json!({ "enabled": args.enabled });
                async move { Ok::<Value, _>(body) }
            },
        );
    }
}

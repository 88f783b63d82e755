//! Fan-out of backend notifications to in-process observers.
//!
//! Debug events are keyed by [`DebugEventKind`]; each kind keeps its observers in
//! registration order. Log text travels on a separate, unkeyed channel that every
//! log observer sees.

use std::collections::HashMap;
use std::sync::Arc;

use cspy_rpc::{DebugEvent, DebugEventKind, LogEvent, Notification};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type DebugCallback = Arc<dyn Fn(&DebugEvent) + Send + Sync>;
type LogCallback = Arc<dyn Fn(&LogEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    debug: HashMap<DebugEventKind, Vec<(SubscriptionId, DebugCallback)>>,
    log: Vec<(SubscriptionId, LogCallback)>,
}

impl Subscribers {
    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }
}

#[derive(Default)]
pub struct EventListenerHandler {
    subscribers: Mutex<Subscribers>,
}

impl std::fmt::Debug for EventListenerHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let subscribers = self.subscribers.lock();
        f.debug_struct("EventListenerHandler")
            .field("debug_kinds", &subscribers.debug.keys().collect::<Vec<_>>())
            .field("log_observers", &subscribers.log.len())
            .finish()
    }
}

impl EventListenerHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_debug_events<F>(&self, kind: DebugEventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&DebugEvent) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id();
        subscribers
            .debug
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn observe_log_events<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&LogEvent) + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.lock();
        let id = subscribers.next_id();
        subscribers.log.push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unobserve(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.log.len();
        subscribers.log.retain(|(sub, _)| *sub != id);
        if subscribers.log.len() != before {
            return true;
        }
        for observers in subscribers.debug.values_mut() {
            let before = observers.len();
            observers.retain(|(sub, _)| *sub != id);
            if observers.len() != before {
                return true;
            }
        }
        false
    }

    pub fn clear(&self) {
        let mut subscribers = self.subscribers.lock();
        subscribers.debug.clear();
        subscribers.log.clear();
    }

    pub fn post_debug_event(&self, event: &DebugEvent) {
        // Snapshot first so observers may (un)subscribe from inside a callback.
        let observers: Vec<DebugCallback> = self
            .subscribers
            .lock()
            .debug
            .get(&event.kind)
            .map(|observers| observers.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        tracing::trace!(
            target: "cspy.dap.events",
            kind = ?event.kind,
            observers = observers.len(),
            "posting debug event"
        );
        for observer in observers {
            observer(event);
        }
    }

    pub fn post_log_event(&self, event: &LogEvent) {
        let observers: Vec<LogCallback> = self
            .subscribers
            .lock()
            .log
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }

    pub fn post(&self, notification: &Notification) {
        match notification {
            Notification::Debug(event) => self.post_debug_event(event),
            Notification::Log(event) => self.post_log_event(event),
        }
    }

    /// Stand in for notifications the receiver skipped.
    ///
    /// Log observers learn that text went missing. A "core stopped" hint is
    /// replayed because a skipped one would leave a stop unreported; an extra
    /// hint only causes one more poll.
    fn recover_from_lag(&self, skipped: u64) {
        self.post_log_event(&LogEvent {
            text: format!(
                "Warning: {skipped} backend notifications were dropped; some output may be missing."
            ),
        });
        self.post_debug_event(&DebugEvent::new(DebugEventKind::CoreStopped));
    }

    /// Deliver everything arriving on `notifications` until the channel closes.
    ///
    /// Returning means the backend connection is gone.
    pub async fn pump(&self, mut notifications: broadcast::Receiver<Notification>) {
        loop {
            match notifications.recv().await {
                Ok(notification) => self.post(&notification),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        target: "cspy.dap.events",
                        skipped,
                        "notification receiver lagged; some backend notifications were dropped"
                    );
                    self.recover_from_lag(skipped);
                }
                Err(RecvError::Closed) => return,
            }
        }
    }
}

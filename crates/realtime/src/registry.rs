//! Per-session subscriber bookkeeping and message fan-out.
//!
//! A [`SubscriberRegistry`] maps each [`MessageKind`] to the handlers
//! subscribed to it. Registering the same handler twice yields two
//! independent entries; each [`SubscriptionId`] removes exactly one.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::messages::{AnalysisMessage, MessageKind};

/// Callback invoked for every received message of its subscribed kind.
pub type Handler = Arc<dyn Fn(&AnalysisMessage) + Send + Sync>;

/// Capability returned by [`SubscriberRegistry::subscribe`]; removes
/// exactly the one registration it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Handler map for one connection session.
///
/// Mutation and dispatch may come from different tasks; all access is
/// serialized through an internal lock. Handlers are invoked *outside*
/// the lock so a callback may subscribe or unsubscribe reentrantly.
pub struct SubscriberRegistry {
    handlers: Mutex<HashMap<MessageKind, Vec<(SubscriptionId, Handler)>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for messages of `kind`.
    pub fn subscribe<F>(&self, kind: MessageKind, handler: F) -> SubscriptionId
    where
        F: Fn(&AnalysisMessage) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one registration. Other subscribers of the same kind are
    /// untouched. Returns `false` if the id was already removed.
    pub fn unsubscribe(&self, kind: MessageKind, id: SubscriptionId) -> bool {
        let mut handlers = self.lock();
        let Some(entries) = handlers.get_mut(&kind) else {
            return false;
        };
        let Some(index) = entries.iter().position(|(entry_id, _)| *entry_id == id) else {
            return false;
        };
        entries.remove(index);
        if entries.is_empty() {
            handlers.remove(&kind);
        }
        true
    }

    /// Invoke every handler subscribed to the message's kind exactly once.
    ///
    /// A panicking handler is isolated: the remaining handlers still run
    /// and the registry stays usable. Returns the number of handlers
    /// invoked (zero for kinds nobody subscribed to).
    pub fn dispatch(&self, message: &AnalysisMessage) -> usize {
        let snapshot: Vec<Handler> = self
            .lock()
            .get(&message.kind())
            .map(|entries| entries.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                tracing::error!(kind = %message.kind(), "Subscriber panicked during dispatch");
            }
        }
        snapshot.len()
    }

    /// Drop every registration. Used when a session disconnects.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of handlers currently subscribed to `kind`.
    pub fn subscriber_count(&self, kind: MessageKind) -> usize {
        self.lock().get(&kind).map(Vec::len).unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<MessageKind, Vec<(SubscriptionId, Handler)>>> {
        // A panic can only poison this lock from registry code itself;
        // handler callbacks never run under it.
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

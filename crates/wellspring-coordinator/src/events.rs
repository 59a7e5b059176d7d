//! Coordinator lifecycle events.
//!
//! A typed observer list rather than a generic emitter: consumers
//! subscribe with a closure and hold the returned [`Subscription`];
//! dropping it (or calling `unsubscribe`) removes the listener without
//! affecting queue semantics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::queue::Priority;

/// Lifecycle events emitted by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// An operation entered the queue.
    Queued {
        /// Operation id
        id: u64,
        /// Caller-supplied category
        category: String,
        /// Assigned priority tier
        priority: Priority,
    },
    /// An operation left the queue and started executing.
    BatchStart {
        /// Operation id
        id: u64,
        /// Caller-supplied category
        category: String,
    },
    /// An operation finished (successfully or not).
    BatchComplete {
        /// Operation id
        id: u64,
        /// Caller-supplied category
        category: String,
        /// Whether the operation resolved
        success: bool,
    },
    /// A rate-limit response paused dequeues for the given cooldown.
    RateLimited {
        /// How long dequeues stay paused
        cooldown: Duration,
    },
    /// First success after a rate-limit cooldown.
    RateLimitReset,
    /// Dequeuing was paused by the caller.
    Paused,
    /// Dequeuing resumed.
    Resumed,
    /// Queued-but-not-started operations were dropped.
    Cleared {
        /// How many operations were rejected
        dropped: usize,
    },
    /// An operation failed with a network-class error.
    NetworkError {
        /// Rendered failure message
        message: String,
    },
    /// First success after a network-class failure.
    NetworkRestored,
}

type Listener = Box<dyn Fn(&CoordinatorEvent) + Send + Sync>;

/// Registry of event listeners.
///
/// Listeners run synchronously on the emitting task and must not call back
/// into the coordinator.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a listener; it stays active while the handle is held.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&CoordinatorEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, Box::new(listener)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    pub(crate) fn emit(&self, event: &CoordinatorEvent) {
        trace!(?event, "coordinator event");
        for (_, listener) in self.listeners.lock().iter() {
            listener(event);
        }
    }

    fn remove(&self, id: u64) {
        self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Handle keeping one listener registered.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Subscription {
    /// Remove the listener now instead of at drop time.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

//! Priority lanes and queued operation bookkeeping.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use wellspring_client::{ClientHandle, TransportOptions};
use wellspring_core::RequestError;

/// Priority tier for queued operations.
///
/// All `High` operations drain before any `Medium` starts, and so on;
/// within a tier, FIFO by enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    /// User-blocking work (auth refresh, the screen being looked at)
    High,
    /// Regular reads and writes
    Medium,
    /// Prefetching and housekeeping
    Low,
}

impl Priority {
    pub(crate) const COUNT: usize = 3;

    pub(crate) fn lane(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

/// Per-operation knobs for [`crate::Coordinator::add`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOptions {
    /// Priority tier
    pub priority: Priority,
    /// Free-form category used in events and logs
    pub category: String,
    /// Timeout/retry settings forwarded to the transport
    pub transport: TransportOptions,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            priority: Priority::default(),
            category: "general".to_string(),
            transport: TransportOptions::default(),
        }
    }
}

impl OperationOptions {
    /// Set the priority tier.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the event/log category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Set the transport options.
    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }
}

pub(crate) type OperationThunk =
    Box<dyn FnMut(Arc<ClientHandle>) -> BoxFuture<'static, Result<Value, RequestError>> + Send>;

/// An operation waiting in (or popped from) the queue.
pub(crate) struct QueuedOperation {
    pub id: u64,
    pub category: String,
    pub priority: Priority,
    pub transport: TransportOptions,
    pub thunk: OperationThunk,
    #[allow(dead_code)] // recorded for queue-age diagnostics
    pub enqueued_at: Instant,
    pub reply: oneshot::Sender<Result<Value, RequestError>>,
}

/// Three FIFO lanes, drained strictly in priority order.
#[derive(Default)]
pub(crate) struct PriorityQueue {
    lanes: [VecDeque<QueuedOperation>; Priority::COUNT],
}

impl PriorityQueue {
    pub fn push(&mut self, op: QueuedOperation) {
        self.lanes[op.priority.lane()].push_back(op);
    }

    pub fn pop_next(&mut self) -> Option<QueuedOperation> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    pub fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }

    pub fn drain_all(&mut self) -> Vec<QueuedOperation> {
        self.lanes.iter_mut().flat_map(|lane| lane.drain(..)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn op(id: u64, priority: Priority) -> QueuedOperation {
        let (reply, _rx) = oneshot::channel();
        QueuedOperation {
            id,
            category: "test".to_string(),
            priority,
            transport: TransportOptions::default(),
            thunk: Box::new(|_| async { Ok(Value::Null) }.boxed()),
            enqueued_at: Instant::now(),
            reply,
        }
    }

    #[test]
    fn pops_by_priority_then_fifo() {
        let mut queue = PriorityQueue::default();
        queue.push(op(1, Priority::Low));
        queue.push(op(2, Priority::High));
        queue.push(op(3, Priority::Medium));
        queue.push(op(4, Priority::High));

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop_next()).map(|op| op.id).collect();
        assert_eq!(order, vec![2, 4, 3, 1]);
    }

    #[test]
    fn drain_empties_every_lane() {
        let mut queue = PriorityQueue::default();
        queue.push(op(1, Priority::Low));
        queue.push(op(2, Priority::High));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain_all().len(), 2);
        assert_eq!(queue.len(), 0);
    }
}

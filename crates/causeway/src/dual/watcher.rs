//! Reachability watcher: the queue between the guest collector and the
//! registry.
//!
//! The guest runtime's cleanup-reference facility reports records whose
//! proxies have lost all strong references; reports land in a lock-free
//! queue and are reconciled later by the registry's bulk drain. Draining is
//! not latency-sensitive and may run lazily; only the scope-end sweep offers
//! a deterministic release point.

use crate::dual::record::RecordId;
use crossbeam::queue::SegQueue;

/// Queue of unreachability notifications, fed from any thread.
#[derive(Debug, Default)]
pub struct ReachabilityWatcher {
    queue: SegQueue<RecordId>,
}

impl ReachabilityWatcher {
    /// Create an empty watcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report that a record's proxy is no longer strongly referenced.
    /// Callable from any guest thread without passing the call fence.
    pub fn report_unreachable(&self, id: RecordId) {
        self.queue.push(id);
    }

    /// Take one queued notification.
    pub(crate) fn pop(&self) -> Option<RecordId> {
        self.queue.pop()
    }

    /// Queued notifications not yet drained.
    pub fn backlog(&self) -> usize {
        self.queue.len()
    }

    /// Whether no notifications are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

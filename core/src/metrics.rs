//! Counters describing what the radio scheduler has done.
//!
//! Relaxed atomics are enough: readers only want monotonic snapshots, and the
//! scheduler is the only writer.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::OperationState;

#[derive(Debug, Default)]
pub struct RadioMetrics {
    pub submitted: AtomicU64,
    pub admitted: AtomicU64,
    pub released: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
    pub events_routed: AtomicU64,
    pub events_dropped: AtomicU64,
}

/// Point-in-time copy of [`RadioMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub submitted: u64,
    pub admitted: u64,
    pub released: u64,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub events_routed: u64,
    pub events_dropped: u64,
}

impl MetricsSnapshot {
    /// Operations that reached any terminal state.
    pub fn terminal(&self) -> u64 {
        self.completed + self.failed + self.timed_out + self.cancelled
    }
}

impl RadioMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_terminal(&self, state: OperationState) {
        match state {
            OperationState::Completed => Self::bump(&self.completed),
            OperationState::Failed => Self::bump(&self.failed),
            OperationState::TimedOut => Self::bump(&self.timed_out),
            OperationState::Cancelled => Self::bump(&self.cancelled),
            OperationState::Queued | OperationState::Running => {}
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            events_routed: self.events_routed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

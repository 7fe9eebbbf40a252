//! Resource engine counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for fetch and binding activity.
///
/// One instance may be shared by any number of bindings through `Arc`.
#[derive(Debug, Default)]
pub struct ResourceMetrics {
    /// Fetch tasks dispatched
    pub fetches_started: AtomicU64,

    /// Fetches whose value was committed
    pub fetches_succeeded: AtomicU64,

    /// Fetches whose error was committed
    pub fetches_failed: AtomicU64,

    /// Fetch tasks aborted before they could commit
    pub fetches_cancelled: AtomicU64,

    /// Results dropped because the entry was reset or replaced mid-flight
    pub results_discarded: AtomicU64,

    /// Times a binding lost exclusivity to a second owner
    pub ownership_conflicts: AtomicU64,

    /// Changes of the effective key, including to and from no key
    pub key_transitions: AtomicU64,
}

impl ResourceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            fetches_cancelled: self.fetches_cancelled.load(Ordering::Relaxed),
            results_discarded: self.results_discarded.load(Ordering::Relaxed),
            ownership_conflicts: self.ownership_conflicts.load(Ordering::Relaxed),
            key_transitions: self.key_transitions.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`ResourceMetrics`] at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub fetches_started: u64,
    pub fetches_succeeded: u64,
    pub fetches_failed: u64,
    pub fetches_cancelled: u64,
    pub results_discarded: u64,
    pub ownership_conflicts: u64,
    pub key_transitions: u64,
}

impl MetricsSnapshot {
    /// Fetches that reached a terminal outcome of any kind.
    pub fn fetches_finished(&self) -> u64 {
        self.fetches_succeeded + self.fetches_failed + self.fetches_cancelled + self.results_discarded
    }
}

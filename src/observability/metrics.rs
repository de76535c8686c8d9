//! Consistency metrics registry
//!
//! - Counters only
//! - Monotonic increase
//! - Thread-safe, relaxed ordering; metrics never influence routing

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for replica traffic, quorum outcomes and retries.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    replica_calls: AtomicU64,
    gone_results: AtomicU64,
    quorum_met: AtomicU64,
    quorum_selected: AtomicU64,
    quorum_not_selected: AtomicU64,
    barrier_calls: AtomicU64,
    primary_fallbacks: AtomicU64,
    retries: AtomicU64,
    background_refreshes: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub replica_calls: u64,
    pub gone_results: u64,
    pub quorum_met: u64,
    pub quorum_selected: u64,
    pub quorum_not_selected: u64,
    pub barrier_calls: u64,
    pub primary_fallbacks: u64,
    pub retries: u64,
    pub background_refreshes: u64,
}

impl MetricsRegistry {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_replica_calls(&self, n: u64) {
        self.replica_calls.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_gone_results(&self) {
        self.gone_results.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_quorum_met(&self) {
        self.quorum_met.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_quorum_selected(&self) {
        self.quorum_selected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_quorum_not_selected(&self) {
        self.quorum_not_selected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_barrier_calls(&self) {
        self.barrier_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_primary_fallbacks(&self) {
        self.primary_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_background_refreshes(&self) {
        self.background_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            replica_calls: self.replica_calls.load(Ordering::Relaxed),
            gone_results: self.gone_results.load(Ordering::Relaxed),
            quorum_met: self.quorum_met.load(Ordering::Relaxed),
            quorum_selected: self.quorum_selected.load(Ordering::Relaxed),
            quorum_not_selected: self.quorum_not_selected.load(Ordering::Relaxed),
            barrier_calls: self.barrier_calls.load(Ordering::Relaxed),
            primary_fallbacks: self.primary_fallbacks.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            background_refreshes: self.background_refreshes.load(Ordering::Relaxed),
        }
    }
}

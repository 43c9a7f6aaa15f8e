//! Engine counters for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by one client
///
/// Each update is mirrored to the global `metrics` recorder through
/// `observability::metrics`.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    enqueued: AtomicU64,
    batches: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    retries: AtomicU64,
    topology_changes: AtomicU64,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        observability::metrics::record_message_enqueued();
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Record a sub-batch handed to the executor
    pub fn inc_batches(&self, messages: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        observability::metrics::record_batch_dispatched(messages);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn add_delivered(&self, count: usize) {
        self.delivered.fetch_add(count as u64, Ordering::Relaxed);
        observability::metrics::record_messages_delivered(count);
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn add_failed(&self, count: usize, reason: &'static str) {
        self.failed.fetch_add(count as u64, Ordering::Relaxed);
        observability::metrics::record_messages_failed(count, reason);
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Executor refused a sub-batch
    pub fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        observability::metrics::record_capacity_rejection();
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        observability::metrics::record_upload_retry();
    }

    pub fn topology_changes(&self) -> u64 {
        self.topology_changes.load(Ordering::Relaxed)
    }

    pub fn inc_topology_changes(&self) {
        self.topology_changes.fetch_add(1, Ordering::Relaxed);
        observability::metrics::record_topology_change();
    }

    /// Get snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued(),
            batches: self.batches(),
            delivered: self.delivered(),
            failed: self.failed(),
            rejected: self.rejected(),
            retries: self.retries(),
            topology_changes: self.topology_changes(),
        }
    }
}

/// Snapshot of engine counters (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub batches: u64,
    pub delivered: u64,
    pub failed: u64,
    pub rejected: u64,
    pub retries: u64,
    pub topology_changes: u64,
}

impl MetricsSnapshot {
    /// Messages admitted but not yet terminally reported
    pub fn outstanding(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.delivered)
            .saturating_sub(self.failed)
    }
}

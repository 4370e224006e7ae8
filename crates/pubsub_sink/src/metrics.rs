//! Sink metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters shared by the dispatcher, the workers and the flush
/// coordinator
#[derive(Debug, Default)]
pub struct SinkMetrics {
    /// Rows handed off to a mailbox
    accepted: AtomicU64,
    /// Successful publish calls (rows and resolved timestamps)
    published: AtomicU64,
    /// Failed publish or encode attempts
    publish_failures: AtomicU64,
    /// Tokens released by workers after a publish attempt
    tokens_released: AtomicU64,
    /// Rows still queued when their worker stopped
    discarded: AtomicU64,
    /// Resolved timestamps handed off
    resolved_emitted: AtomicU64,
    /// Completed flushes
    flushes: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_publish_failures(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tokens_released(&self) {
        self.tokens_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_discarded(&self, count: u64) {
        self.discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_resolved_emitted(&self) {
        self.resolved_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_flushes(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            tokens_released: self.tokens_released.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            resolved_emitted: self.resolved_emitted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of sink metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub tokens_released: u64,
    pub discarded: u64,
    pub resolved_emitted: u64,
    pub flushes: u64,
}

//! Delivery metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

/// In-process delivery counters
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    /// Calls durably enqueued
    enqueued: AtomicU64,
    /// Failed enqueue attempts (caller was told)
    enqueue_failures: AtomicU64,
    /// Calls delivered (Success / NotModified)
    delivered: AtomicU64,
    /// Retries scheduled
    retried: AtomicU64,
    /// Calls dropped (terminal failure, queue full, retries exhausted, payload missing)
    dropped: AtomicU64,
    /// Index entries dropped at load time
    dropped_corrupt: AtomicU64,
}

impl DeliveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn inc_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn enqueue_failures(&self) -> u64 {
        self.enqueue_failures.load(Ordering::Relaxed)
    }

    pub fn inc_enqueue_failures(&self) {
        self.enqueue_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn inc_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// The dropped-telemetry counter
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_corrupt(&self) -> u64 {
        self.dropped_corrupt.load(Ordering::Relaxed)
    }

    pub fn add_dropped_corrupt(&self, count: u64) {
        self.dropped_corrupt.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            enqueued: self.enqueued(),
            enqueue_failures: self.enqueue_failures(),
            delivered: self.delivered(),
            retried: self.retried(),
            dropped: self.dropped(),
            dropped_corrupt: self.dropped_corrupt(),
        }
    }
}

/// Snapshot of delivery metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub enqueued: u64,
    pub enqueue_failures: u64,
    pub delivered: u64,
    pub retried: u64,
    pub dropped: u64,
    pub dropped_corrupt: u64,
}

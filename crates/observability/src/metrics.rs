//! Delivery engine metrics
//!
//! Thin wrappers over the `metrics` facade. Without an installed recorder
//! (tests, `init_with_config` with metrics disabled) every call is a no-op.

use contracts::{Destination, InternalErrorKind};
use metrics::{counter, gauge, histogram};

/// A call was durably enqueued
pub fn record_call_enqueued(destination: Destination) {
    counter!(
        "telemetry_delivery_calls_enqueued_total",
        "destination" => destination.as_str()
    )
    .increment(1);
}

/// One transport attempt finished with `outcome` (an outcome label)
pub fn record_delivery_outcome(destination: Destination, outcome: &'static str) {
    counter!(
        "telemetry_delivery_attempts_total",
        "destination" => destination.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// A call left the store without being delivered
pub fn record_call_dropped(destination: Destination, reason: &str) {
    counter!(
        "telemetry_delivery_calls_dropped_total",
        "destination" => destination.as_str(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// A failed call was queued for another attempt after `delay_ms`
pub fn record_retry_scheduled(destination: Destination, delay_ms: u64) {
    counter!(
        "telemetry_delivery_retries_total",
        "destination" => destination.as_str()
    )
    .increment(1);
    histogram!(
        "telemetry_delivery_retry_delay_ms",
        "destination" => destination.as_str()
    )
    .record(delay_ms as f64);
}

/// Rate limiter admission decision
pub fn record_admission(admitted: bool) {
    let decision = if admitted { "admitted" } else { "rejected" };
    counter!("telemetry_delivery_admissions_total", "decision" => decision).increment(1);
}

/// Snapshot cycle result: written, skipped, empty, failed or panicked
pub fn record_snapshot(result: &'static str) {
    counter!("telemetry_delivery_snapshots_total", "result" => result).increment(1);
}

/// Pending calls currently held for `destination`
pub fn record_queue_depth(destination: Destination, depth: usize) {
    gauge!(
        "telemetry_delivery_queue_depth",
        "destination" => destination.as_str()
    )
    .set(depth as f64);
}

pub fn record_internal_error(kind: InternalErrorKind) {
    counter!("telemetry_delivery_internal_errors_total", "kind" => kind.as_str()).increment(1);
}

//! `status` command implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use contracts::{DeliveryConfig, Destination, PendingCall};
use serde::Serialize;

use super::open_storage;
use crate::cli::StatusArgs;

#[derive(Serialize)]
struct StatusReport {
    storage_dir: String,
    total_pending: usize,
    destinations: Vec<DestinationStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot_taken_at: Option<String>,
}

#[derive(Serialize)]
struct DestinationStatus {
    destination: Destination,
    pending: usize,
    max_pending: usize,
    calls: Vec<CallStatus>,
}

#[derive(Serialize)]
struct CallStatus {
    payload_ref: String,
    enqueued_at: String,
}

/// Execute the `status` command
pub fn run_status(config: &DeliveryConfig, args: &StatusArgs) -> Result<()> {
    let storage = open_storage(config)?;
    let loaded = storage.store.load_all().context("Failed to load pending calls")?;
    let snapshot = storage
        .snapshots
        .load_last()
        .context("Failed to read snapshot")?;

    let destinations: Vec<_> = Destination::ALL
        .into_iter()
        .map(|destination| {
            let calls = loaded.get(&destination).map(Vec::as_slice).unwrap_or(&[]);
            DestinationStatus {
                destination,
                pending: calls.len(),
                max_pending: storage.store.max_pending(destination),
                calls: calls.iter().map(call_status).collect(),
            }
        })
        .collect();

    let report = StatusReport {
        storage_dir: storage.layout.root().display().to_string(),
        total_pending: destinations.iter().map(|d| d.pending).sum(),
        destinations,
        snapshot_taken_at: snapshot.map(|s| format_ms(s.taken_at_ms)),
    };

    if args.json {
        let json =
            serde_json::to_string_pretty(&report).context("Failed to serialize status report")?;
        println!("{}", json);
    } else {
        print_status(&report);
    }
    Ok(())
}

fn call_status(call: &PendingCall) -> CallStatus {
    CallStatus {
        payload_ref: call.payload_ref.to_string(),
        enqueued_at: format_ms(call.enqueue_time_ms),
    }
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

fn print_status(report: &StatusReport) {
    println!("\n=== Pending Calls ({}) ===\n", report.storage_dir);
    for destination in &report.destinations {
        println!(
            "{}: {}/{}",
            destination.destination, destination.pending, destination.max_pending
        );
        for call in &destination.calls {
            println!("  - {} (enqueued {})", call.payload_ref, call.enqueued_at);
        }
    }
    println!("\nTotal pending: {}", report.total_pending);
    if let Some(ref taken_at) = report.snapshot_taken_at {
        println!("Unsent snapshot from {}", taken_at);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ms_is_rfc3339() {
        assert_eq!(format_ms(0), "1970-01-01T00:00:00+00:00");
    }
}

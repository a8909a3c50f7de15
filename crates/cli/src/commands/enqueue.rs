//! `enqueue` command implementation.

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::open_storage;
use crate::cli::EnqueueArgs;
use contracts::DeliveryConfig;

/// Execute the `enqueue` command
pub fn run_enqueue(config: &DeliveryConfig, args: &EnqueueArgs) -> Result<()> {
    let payload = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read payload {}", args.file.display()))?;
    let storage = open_storage(config)?;

    // Load the existing queue first so the cap accounts for what is on disk
    storage.store.load_all().context("Failed to load pending calls")?;

    let enqueued = storage
        .store
        .enqueue(args.destination, &payload, args.metadata())
        .context("Failed to enqueue payload")?;

    if let Some(evicted) = &enqueued.evicted {
        warn!(
            payload_ref = %evicted.payload_ref,
            "Queue full, oldest pending call dropped"
        );
    }

    info!(
        destination = %args.destination,
        payload_ref = %enqueued.call.payload_ref,
        bytes = payload.len(),
        "Payload enqueued"
    );
    println!("{}", enqueued.call.payload_ref);
    Ok(())
}

//! Command implementations.

mod enqueue;
mod run;
mod status;
mod validate;

pub use enqueue::run_enqueue;
pub use run::run_delivery;
pub use status::run_status;
pub use validate::run_validate;

use anyhow::{Context, Result};
use contracts::{DeliveryConfig, InternalErrorSink, SystemClock};
use delivery::LogErrorSink;
use std::sync::Arc;
use storage::{PendingCallStore, PeriodicSnapshotCache, StoreLayout};
use tracing::info;

use crate::cli::Cli;

/// Snapshot file name of the in-progress session payload
const SESSION_SNAPSHOT: &str = "session";

/// Load configuration (or defaults) and apply CLI overrides
pub fn load_config(cli: &Cli) -> Result<DeliveryConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            info!(config = %path.display(), "Loading configuration");
            config_loader::ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => DeliveryConfig::default(),
    };

    if let Some(storage_dir) = &cli.storage_dir {
        info!(storage_dir = %storage_dir.display(), "Overriding storage directory from CLI");
        config.storage_dir = storage_dir.clone();
    }
    if let Some(workers) = cli.workers {
        anyhow::ensure!(workers >= 1, "--workers must be at least 1");
        info!(workers, "Overriding worker count from CLI");
        config.workers = workers;
    }

    Ok(config)
}

/// Durable handles shared by the commands
pub struct Storage {
    pub layout: StoreLayout,
    pub store: Arc<PendingCallStore>,
    pub snapshots: PeriodicSnapshotCache,
    pub error_sink: Arc<dyn InternalErrorSink>,
}

pub fn open_storage(config: &DeliveryConfig) -> Result<Storage> {
    let error_sink: Arc<dyn InternalErrorSink> = Arc::new(LogErrorSink::new());
    let layout = StoreLayout::new(&config.storage_dir);
    let store = PendingCallStore::open(
        layout.clone(),
        config.queue_limits.clone(),
        Arc::new(SystemClock),
        Arc::clone(&error_sink),
    )
    .with_context(|| format!("Failed to open store at {}", config.storage_dir.display()))?;
    let snapshots = PeriodicSnapshotCache::new(
        layout.snapshot_path(SESSION_SNAPSHOT),
        Arc::clone(&error_sink),
    );

    Ok(Storage {
        layout,
        store: Arc::new(store),
        snapshots,
        error_sink,
    })
}

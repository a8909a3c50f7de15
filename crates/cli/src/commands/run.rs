//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::{DeliveryConfig, Destination, Transport};
use delivery::transports::{LogTransport, ScriptedTransport};
use delivery::{DeliveryOrchestrator, DeliveryOrchestratorBuilder, MetricsSnapshot};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{open_storage, Storage};
use crate::cli::RunArgs;

/// How often the drained check polls the store
const DRAIN_POLL: Duration = Duration::from_millis(200);

/// Execute the `run` command
pub async fn run_delivery(config: &DeliveryConfig, args: &RunArgs) -> Result<()> {
    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
        info!("Metrics endpoint available on port {}", args.metrics_port);
    }

    let storage = open_storage(config)?;
    info!(
        storage_dir = %config.storage_dir.display(),
        workers = config.workers,
        outcome = ?args.outcome,
        "Configuration loaded"
    );

    // A 429 blocks the destination the call was sent to, so the destination
    // carried by the scripted outcome is informational only
    match args.outcome.outcome(Destination::Logs) {
        Some(outcome) => {
            let transport = Arc::new(ScriptedTransport::new("scripted", outcome));
            deliver(config, args, storage, transport).await
        }
        None => deliver(config, args, storage, Arc::new(LogTransport::new("log"))).await,
    }
}

async fn deliver<T>(
    config: &DeliveryConfig,
    args: &RunArgs,
    storage: Storage,
    transport: Arc<T>,
) -> Result<()>
where
    T: Transport + Sync + 'static,
{
    let start_time = Instant::now();
    let orchestrator = DeliveryOrchestratorBuilder::new()
        .config(config)
        .error_sink(Arc::clone(&storage.error_sink))
        .build(Arc::clone(&storage.store), transport)
        .context("Failed to build delivery orchestrator")?;

    let resumed = orchestrator.resume().context("Failed to resume pending calls")?;
    if let Some(call) = orchestrator
        .recover_snapshot(&storage.snapshots)
        .context("Failed to recover snapshot")?
    {
        info!(payload_ref = %call.payload_ref, "Recovered unsent snapshot");
    }
    info!(resumed, "Starting delivery...");
    orchestrator.start();

    let timeout = async {
        match args.timeout {
            0 => std::future::pending::<()>().await,
            secs => tokio::time::sleep(Duration::from_secs(secs)).await,
        }
    };

    tokio::select! {
        _ = drained(&orchestrator) => {
            info!("All pending calls processed");
        }
        _ = timeout => {
            warn!(timeout_secs = args.timeout, "Timeout reached, stopping delivery...");
        }
        _ = setup_shutdown_signal() => {
            warn!("Received shutdown signal, stopping delivery...");
        }
    }

    orchestrator.shutdown().await;
    let remaining = orchestrator.store().total_pending();
    print_summary(&orchestrator.metrics().snapshot(), remaining, start_time.elapsed());

    info!(remaining, "Telemetry delivery finished");
    Ok(())
}

/// Resolves once nothing is left to deliver
async fn drained<T>(orchestrator: &DeliveryOrchestrator<T>)
where
    T: Transport + Sync + 'static,
{
    loop {
        if orchestrator.store().total_pending() == 0 {
            return;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn setup_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn print_summary(metrics: &MetricsSnapshot, remaining: usize, elapsed: Duration) {
    println!("\n=== Delivery Summary ===\n");
    println!("  Duration: {:.2}s", elapsed.as_secs_f64());
    println!("  Delivered: {}", metrics.delivered);
    println!("  Retries scheduled: {}", metrics.retried);
    println!("  Dropped: {}", metrics.dropped);
    if metrics.dropped_corrupt > 0 {
        println!("  Dropped at load (corrupt): {}", metrics.dropped_corrupt);
    }
    println!("  Still pending: {}", remaining);
    println!();
}

//! rotor-controller
//!
//! Keeps one fresh, randomly named instance per parent and rotates it before
//! it expires.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use rotor_controller::{
    config::Config,
    seed,
    worker::{self, RotationWorker},
};
use rotor_reconcile::{MemoryStore, Reconciler, RotationPolicy};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to ROTOR_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting rotor controller");
    info!(
        max_lifetime_secs = config.max_lifetime.as_secs(),
        handover_secs = config.handover.as_secs(),
        "Configuration loaded"
    );

    let parents = match &config.seed_file {
        Some(path) => match seed::load_parents(path) {
            Ok(parents) => parents,
            Err(e) => {
                error!(error = %e, "Failed to load seed parents");
                return Err(e);
            }
        },
        None => Vec::new(),
    };
    info!(count = parents.len(), "Parents loaded");

    let policy = match RotationPolicy::from_std(config.max_lifetime, config.handover) {
        Ok(policy) => policy,
        Err(e) => {
            error!(error = %e, "Invalid rotation policy");
            return Err(e.into());
        }
    };
    let store = Arc::new(MemoryStore::with_parents(parents));
    let reconciler = Reconciler::new(store.clone(), policy);

    // Seed parents go straight into the worker's schedule; the channel only
    // carries later change notifications.
    let initial = store.parent_keys().await;
    let (events_tx, events_rx) = mpsc::channel(1024);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = RotationWorker::new(reconciler, config.worker());
    let mut worker_handle = tokio::spawn(async move {
        worker.run(initial, events_rx, shutdown_rx).await;
    });

    // Wait for shutdown signal (Ctrl+C), or for the worker to die early
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            return match result {
                Ok(()) => Err(anyhow!("rotation worker exited unexpectedly")),
                Err(e) => {
                    error!(error = %e, "Rotation worker task failed");
                    Err(e.into())
                }
            };
        }
    }

    let _ = shutdown_tx.send(true);
    drop(events_tx);

    worker::wait_for_exit(worker_handle, std::time::Duration::from_secs(10)).await?;

    info!("Controller shutdown complete");
    Ok(())
}

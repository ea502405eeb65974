//! Host process: owns client connections and the worker pool.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use hearth_notify::ConnectionRegistry;
use hearth_scheduler::{JobStore, StoreConfig};
use hearth_workers::{WorkerConfig, WorkerManager, WorkerState};
use miette::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::handlers;

/// How often the daemon logs pool status.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

pub struct DaemonConfig {
    pub database: PathBuf,
    pub store: StoreConfig,
    pub workers: WorkerConfig,
}

pub async fn run(config: DaemonConfig) -> Result<()> {
    let store = JobStore::open(&config.database, config.store)
        .map_err(|e| miette::miette!("failed to open job store: {}", e))?;
    let registry =
        handlers::registry().map_err(|e| miette::miette!("failed to build job registry: {}", e))?;
    let connections = Arc::new(ConnectionRegistry::new());

    let manager = WorkerManager::new(
        Arc::new(store),
        Arc::new(registry),
        connections.clone(),
        config.workers,
    );
    let workers = manager
        .start()
        .await
        .map_err(|e| miette::miette!("failed to start workers: {}", e))?;
    info!(workers, database = %config.database.display(), "hearth daemon running");

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(forward_shutdown(tokio::signal::ctrl_c(), shutdown_tx));

    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            // A closed channel means no signal handler; keep running.
            Ok(()) = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                let status = manager.status().await;
                let running = status.iter().filter(|s| s.state == WorkerState::Running).count();
                let failed = status.iter().filter(|s| s.state == WorkerState::Failed).count();
                match manager.store().get_total_pending() {
                    Ok(pending) => info!(
                        running,
                        failed,
                        pending,
                        connections = connections.len(),
                        "worker pool status"
                    ),
                    Err(e) => {
                        warn!(error = %e, "failed to count pending jobs");
                        info!(
                            running,
                            failed,
                            connections = connections.len(),
                            "worker pool status"
                        );
                    }
                }
                if failed > 0 {
                    warn!(failed, "worker slots are down and will not be restarted");
                }
            }
        }
    }

    manager.shutdown().await;
    info!("hearth daemon stopped");
    Ok(())
}

/// Flip `shutdown` once `signal` fires. A signal that cannot be installed
/// leaves the flag untouched.
async fn forward_shutdown(signal: impl Future<Output = io::Result<()>>, shutdown: watch::Sender<bool>) {
    if let Err(e) = signal.await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("received shutdown signal");
    let _ = shutdown.send(true);
}

//! Expiry Sweep Task
//!
//! Background task that purges expired entries from both cache tiers. The
//! disk tier is swept once at startup and then on every interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{DiskStore, MemoryStore, SweepReport};

/// Spawns a background task that periodically removes expired entries.
///
/// Disk sweeps run on the blocking pool so no caller ever waits on them.
/// The returned handle is aborted during graceful shutdown.
///
/// # Example
/// ```ignore
/// let handle = spawn_cleanup_task(memory.clone(), Some(disk), 300);
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_cleanup_task(
    memory: Arc<RwLock<MemoryStore>>,
    disk: Option<DiskStore>,
    cleanup_interval_secs: u64,
) -> JoinHandle<()> {
    let interval = Duration::from_secs(cleanup_interval_secs.max(1));

    tokio::spawn(async move {
        info!(
            "Starting expiry sweep task with interval of {} seconds",
            cleanup_interval_secs
        );

        if let Some(disk) = &disk {
            sweep_disk(disk).await;
        }

        loop {
            tokio::time::sleep(interval).await;

            let removed = memory.write().await.cleanup_expired();
            if removed > 0 {
                info!("Expiry sweep: removed {} expired memory entries", removed);
            } else {
                debug!("Expiry sweep: no expired memory entries found");
            }

            if let Some(disk) = &disk {
                sweep_disk(disk).await;
            }
        }
    })
}

async fn sweep_disk(disk: &DiskStore) -> Option<SweepReport> {
    let store = disk.clone();
    match tokio::task::spawn_blocking(move || store.sweep()).await {
        Ok(report) => {
            if report.removed > 0 || report.failed > 0 {
                info!(
                    scanned = report.scanned,
                    removed = report.removed,
                    failed = report.failed,
                    "Disk sweep finished"
                );
            } else {
                debug!(scanned = report.scanned, "Disk sweep found nothing to remove");
            }
            Some(report)
        }
        Err(err) => {
            warn!(error = %err, "Disk sweep task failed");
            None
        }
    }
}

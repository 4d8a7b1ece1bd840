//! Disk Writer Task
//!
//! Serializes disk mutations off the caller's path. Commands run in order on
//! the blocking pool, so a remove queued after a write always wins.
//!
//! The queue is bounded. Writes are dropped when it is full, which only costs
//! a later disk miss; removes and clears wait for room.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, DiskStore};

/// Commands buffered before writes start being dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

enum DiskCommand {
    Write { key: String, entry: CacheEntry },
    Remove { key: String },
    Clear,
    Flush(oneshot::Sender<()>),
}

// == Disk Writer ==
/// Sending half of the writer queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DiskWriter {
    tx: mpsc::Sender<DiskCommand>,
}

impl std::fmt::Debug for DiskCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiskCommand::Write { key, .. } => write!(f, "Write({})", key),
            DiskCommand::Remove { key } => write!(f, "Remove({})", key),
            DiskCommand::Clear => f.write_str("Clear"),
            DiskCommand::Flush(_) => f.write_str("Flush"),
        }
    }
}

impl DiskWriter {
    async fn send(&self, command: DiskCommand) -> bool {
        match self.tx.send(command).await {
            Ok(()) => true,
            Err(err) => {
                warn!(command = ?err.0, "Disk writer stopped, dropping command");
                false
            }
        }
    }

    /// Queues a write without waiting. Returns false if the write was dropped
    /// because the queue is full or the writer has stopped.
    pub fn write(&self, key: String, entry: CacheEntry) -> bool {
        match self.tx.try_send(DiskCommand::Write { key, entry }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                warn!(command = ?command, "Disk writer queue full, dropping write");
                false
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                warn!(command = ?command, "Disk writer stopped, dropping command");
                false
            }
        }
    }

    pub async fn remove(&self, key: String) -> bool {
        self.send(DiskCommand::Remove { key }).await
    }

    pub async fn clear(&self) -> bool {
        self.send(DiskCommand::Clear).await
    }

    /// Waits until every command queued before this call has been applied.
    pub async fn flush(&self) -> bool {
        let (done_tx, done_rx) = oneshot::channel();
        if !self.send(DiskCommand::Flush(done_tx)).await {
            return false;
        }
        done_rx.await.is_ok()
    }
}

/// Spawns the writer loop for `store`.
///
/// The loop ends once every `DiskWriter` clone has been dropped and the
/// queue is drained.
pub fn spawn_disk_writer(store: DiskStore) -> (DiskWriter, JoinHandle<()>) {
    spawn_disk_writer_with_capacity(store, DEFAULT_QUEUE_CAPACITY)
}

/// Like [`spawn_disk_writer`] with an explicit queue capacity.
pub fn spawn_disk_writer_with_capacity(
    store: DiskStore,
    capacity: usize,
) -> (DiskWriter, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<DiskCommand>(capacity.max(1));

    let handle = tokio::spawn(async move {
        info!(dir = %store.dir().display(), "Disk writer started");

        while let Some(command) = rx.recv().await {
            match command {
                DiskCommand::Flush(done) => {
                    let _ = done.send(());
                }
                command => {
                    let store = store.clone();
                    let applied = tokio::task::spawn_blocking(move || apply(&store, command)).await;
                    if let Err(err) = applied {
                        warn!(error = %err, "Disk write task failed");
                    }
                }
            }
        }

        debug!("Disk writer stopped");
    });

    (DiskWriter { tx }, handle)
}

fn apply(store: &DiskStore, command: DiskCommand) {
    match command {
        DiskCommand::Write { key, entry } => {
            store.set(&key, &entry);
        }
        DiskCommand::Remove { key } => {
            store.remove(&key);
        }
        DiskCommand::Clear => {
            let removed = store.clear();
            debug!(removed, "Disk cache cleared");
        }
        DiskCommand::Flush(done) => {
            let _ = done.send(());
        }
    }
}

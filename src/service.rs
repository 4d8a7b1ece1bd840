//! Cache Service
//!
//! The one object callers hold. Built once from configuration, shared as
//! `Arc<CacheService>`, and torn down explicitly so queued disk writes land.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{CachePolicy, CacheStats, DiskStore, MemoryStore, Params};
use crate::config::Config;
use crate::error::Result;
use crate::fetch::{
    BackendTransport, BatchConfig, BatchCoordinator, BatchOutcome, BatchRequest, CancelToken,
    DiskTier, FetchConfig, FetchOutcome, FetchRequest, FetchStats, Fetcher, HttpTransport,
    RateGovernor, Transport, TransportKind,
};
use crate::tasks::{spawn_cleanup_task, spawn_disk_writer, DiskWriter};

/// Combined counters for both tiers and the fetch path.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub memory: CacheStats,
    pub fetch: FetchStats,
    pub in_flight: usize,
    pub consecutive_quota_hits: u32,
    pub disk_enabled: bool,
    pub transport: &'static str,
}

// == Cache Service ==
pub struct CacheService {
    fetcher: Fetcher,
    batch: BatchCoordinator,
    writer: Option<DiskWriter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheService {
    // == Construction ==
    /// Builds the upstream transport named by the configuration.
    pub fn transport_from_config(config: &Config) -> Result<Arc<dyn Transport>> {
        let transport: Arc<dyn Transport> = match config.transport {
            TransportKind::Api => Arc::new(HttpTransport::new(
                config.upstream_url.as_str(),
                config.upstream_key_header.as_str(),
                config.upstream_api_key.as_str(),
                config.upstream_timeout,
            )?),
            TransportKind::Backend => Arc::new(BackendTransport::new(
                config.backend_url.as_str(),
                config.backend_api_key.as_str(),
                config.upstream_timeout,
            )?),
        };
        Ok(transport)
    }

    /// Builds every component from configuration and starts the background tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Self::transport_from_config(config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Like `from_config`, with an injected transport.
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let memory = Arc::new(RwLock::new(MemoryStore::new(config.memory_limits())));
        let disk = config.cache_dir.as_ref().map(DiskStore::new);

        Self::assemble(
            transport,
            memory,
            disk,
            Arc::new(RateGovernor::new(config.rate_config())),
            config.fetch_config(),
            config.batch_config(),
            config.sweep_interval,
        )
    }

    fn assemble(
        transport: Arc<dyn Transport>,
        memory: Arc<RwLock<MemoryStore>>,
        disk: Option<DiskStore>,
        governor: Arc<RateGovernor>,
        fetch_config: FetchConfig,
        batch_config: BatchConfig,
        sweep_interval: u64,
    ) -> Self {
        let mut tasks = Vec::new();
        let mut builder = Fetcher::builder(Arc::clone(&transport))
            .memory(Arc::clone(&memory))
            .governor(governor)
            .classifier(Arc::new(CachePolicy::default()))
            .config(fetch_config);

        let writer = match &disk {
            Some(store) => {
                let (writer, handle) = spawn_disk_writer(store.clone());
                tasks.push(handle);
                builder = builder.disk(DiskTier {
                    store: store.clone(),
                    writer: writer.clone(),
                });
                Some(writer)
            }
            None => None,
        };

        tasks.push(spawn_cleanup_task(memory, disk.clone(), sweep_interval));

        let fetcher = builder.build();
        let batch = BatchCoordinator::new(fetcher.clone(), batch_config);

        info!(
            transport = transport.name(),
            disk = ?disk.as_ref().map(|d| d.dir().display().to_string()),
            "Cache service started"
        );

        Self {
            fetcher,
            batch,
            writer,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    // == Operations ==
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
        self.fetcher.fetch(request).await
    }

    pub async fn fetch_with_cancel(
        &self,
        request: FetchRequest,
        cancel: &CancelToken,
    ) -> Result<FetchOutcome> {
        self.fetcher.fetch_with_cancel(request, Some(cancel)).await
    }

    pub async fn fetch_batch(&self, request: &BatchRequest) -> Result<BatchOutcome> {
        self.batch.run(request).await
    }

    pub async fn invalidate(&self, endpoint: &str, params: &Params) -> bool {
        self.fetcher.invalidate(endpoint, params).await
    }

    pub async fn clear(&self) {
        self.fetcher.clear().await;
    }

    /// Evicts low-priority memory entries until usage is at most `target_bytes`.
    pub async fn relieve_memory_pressure(&self, target_bytes: usize) -> usize {
        let evicted = self
            .fetcher
            .memory()
            .write()
            .await
            .relieve_pressure(target_bytes);
        if evicted > 0 {
            info!(evicted, target_bytes, "Relieved memory pressure");
        }
        evicted
    }

    pub async fn stats(&self) -> ServiceStats {
        let memory = self.fetcher.memory().read().await.stats();
        ServiceStats {
            memory,
            fetch: self.fetcher.stats(),
            in_flight: self.fetcher.registry().len(),
            consecutive_quota_hits: self.fetcher.governor().state().consecutive_quota_hits,
            disk_enabled: self.writer.is_some(),
            transport: self.fetcher.transport_name(),
        }
    }

    // == Shutdown ==
    /// Stops the sweeper and waits for queued disk writes to be applied.
    pub async fn shutdown(&self) {
        if let Some(writer) = &self.writer {
            if !writer.flush().await {
                warn!("Disk writer was already stopped, pending writes may be lost");
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            task.abort();
        }
        info!("Cache service stopped");
    }
}

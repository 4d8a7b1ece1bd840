//! Batch Coordinator Module
//!
//! Fans one logical request out over a partition key (for example one call
//! per league), paces the partitions, and merges what came back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::{Params, TtlPolicy};
use crate::error::{FetchError, Result};
use crate::fetch::{FetchOutcome, FetchRequest, Fetcher};

// == Batch Config ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// One partition at a time, `delay` between calls
    Sequential { delay: Duration },
    /// Up to `size` partitions together, `delay` between groups
    Grouped { size: usize, delay: Duration },
}

impl BatchMode {
    /// Sequential for a group size of one, grouped otherwise.
    pub fn from_group_size(size: usize, delay: Duration) -> Self {
        if size <= 1 {
            BatchMode::Sequential { delay }
        } else {
            BatchMode::Grouped { size, delay }
        }
    }

    fn group_size(&self) -> usize {
        match self {
            BatchMode::Sequential { .. } => 1,
            BatchMode::Grouped { size, .. } => (*size).max(1),
        }
    }

    fn delay(&self) -> Duration {
        match self {
            BatchMode::Sequential { delay } | BatchMode::Grouped { delay, .. } => *delay,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub mode: BatchMode,
    /// Pause applied after a partition exhausted its quota retries
    pub quota_cooldown: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            mode: BatchMode::Sequential {
                delay: Duration::from_millis(250),
            },
            quota_cooldown: Duration::from_secs(60),
        }
    }
}

// == Batch Request ==
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub endpoint: String,
    /// Parameters shared by every partition
    pub params: Params,
    pub partition_key: String,
    pub partitions: Vec<String>,
    pub ttl: Option<TtlPolicy>,
}

impl BatchRequest {
    pub fn new(
        endpoint: impl Into<String>,
        partition_key: impl Into<String>,
        partitions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Params::new(),
            partition_key: partition_key.into(),
            partitions: partitions.into_iter().map(Into::into).collect(),
            ttl: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    fn partition_request(&self, partition: &str) -> FetchRequest {
        let mut request = FetchRequest::new(self.endpoint.as_str())
            .with_params(self.params.clone())
            .param(self.partition_key.as_str(), partition);
        request.ttl = self.ttl;
        request
    }
}

// == Report ==
#[derive(Debug, Clone, Serialize)]
pub struct PartitionFailure {
    pub partition: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<PartitionFailure>,
}

impl BatchReport {
    pub fn is_partial(&self) -> bool {
        self.failed > 0 && self.succeeded > 0
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// Union of all partition items, deduplicated by identity
    pub items: Vec<Value>,
    pub report: BatchReport,
}

// == Identity ==
/// Maps an item to the key used to drop duplicates across partitions.
pub type IdentityFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

const IDENTITY_POINTERS: &[&str] = &["/fixture/id", "/league/id", "/team/id", "/player/id", "/id"];

/// First known id field of the item, else its JSON text.
pub fn default_identity(item: &Value) -> String {
    IDENTITY_POINTERS
        .iter()
        .find_map(|pointer| {
            item.pointer(pointer)
                .filter(|v| !v.is_null())
                .map(|v| format!("{}={}", pointer, v))
        })
        .unwrap_or_else(|| item.to_string())
}

// == Coordinator ==
pub struct BatchCoordinator {
    fetcher: Fetcher,
    config: BatchConfig,
    identity: IdentityFn,
}

/// Accumulates partition results in request order.
struct Merge<'a> {
    identity: &'a IdentityFn,
    seen: HashSet<String>,
    items: Vec<Value>,
    report: BatchReport,
    last_error: Option<FetchError>,
}

impl<'a> Merge<'a> {
    fn new(identity: &'a IdentityFn, total: usize) -> Self {
        Self {
            identity,
            seen: HashSet::new(),
            items: Vec::new(),
            report: BatchReport {
                total,
                ..BatchReport::default()
            },
            last_error: None,
        }
    }

    /// Records one partition. Returns true when it hit the quota ceiling.
    fn record(&mut self, partition: &str, result: Result<FetchOutcome>) -> bool {
        match result {
            Ok(outcome) => {
                self.report.succeeded += 1;
                for item in outcome.envelope.response {
                    if self.seen.insert((self.identity)(&item)) {
                        self.items.push(item);
                    }
                }
                false
            }
            Err(err) => {
                warn!(partition, error = %err, "Batch partition failed");
                let quota = err.is_rate_limit();
                self.report.failed += 1;
                self.report.failures.push(PartitionFailure {
                    partition: partition.to_string(),
                    error: err.to_string(),
                });
                self.last_error = Some(err);
                quota
            }
        }
    }
}

impl BatchCoordinator {
    pub fn new(fetcher: Fetcher, config: BatchConfig) -> Self {
        Self {
            fetcher,
            config,
            identity: Arc::new(default_identity),
        }
    }

    /// Replaces the item identity used for deduplication.
    pub fn with_identity(mut self, identity: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
        self.identity = Arc::new(identity);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub async fn run(&self, request: &BatchRequest) -> Result<BatchOutcome> {
        let mut seen_partitions = HashSet::new();
        let partitions: Vec<&str> = request
            .partitions
            .iter()
            .map(String::as_str)
            .filter(|p| seen_partitions.insert(*p))
            .collect();

        if partitions.is_empty() {
            return Err(FetchError::InvalidRequest(
                "batch needs at least one partition".to_string(),
            ));
        }

        info!(
            endpoint = %request.endpoint,
            partition_key = %request.partition_key,
            partitions = partitions.len(),
            "Starting batch"
        );

        let mut merge = Merge::new(&self.identity, partitions.len());
        let groups: Vec<&[&str]> = partitions.chunks(self.config.mode.group_size()).collect();
        let last_group = groups.len() - 1;

        for (index, group) in groups.into_iter().enumerate() {
            let results = join_all(
                group
                    .iter()
                    .map(|p| self.fetcher.fetch(request.partition_request(p))),
            )
            .await;

            let mut quota_hit = false;
            for (partition, result) in group.iter().zip(results) {
                quota_hit |= merge.record(partition, result);
            }

            if index == last_group {
                break;
            }
            if quota_hit {
                warn!(
                    cooldown_secs = self.config.quota_cooldown.as_secs_f64(),
                    "Quota exhausted mid-batch, pausing remaining partitions"
                );
                tokio::time::sleep(self.config.quota_cooldown).await;
            } else if !self.config.mode.delay().is_zero() {
                tokio::time::sleep(self.config.mode.delay()).await;
            }
        }

        let Merge {
            items,
            report,
            last_error,
            ..
        } = merge;

        if report.succeeded == 0 {
            let last = last_error.unwrap_or_else(|| FetchError::Internal("no partition ran".into()));
            return Err(FetchError::BatchFailed {
                total: report.total,
                last: Box::new(last),
            });
        }

        if report.is_partial() {
            warn!(
                endpoint = %request.endpoint,
                succeeded = report.succeeded,
                failed = report.failed,
                "Batch completed with partial results"
            );
        } else {
            debug!(endpoint = %request.endpoint, items = items.len(), "Batch completed");
        }

        Ok(BatchOutcome { items, report })
    }
}

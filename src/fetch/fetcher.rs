//! Fetcher Module
//!
//! Orchestrates one logical request: memory and disk lookup, in-flight
//! dedup, rate gating, the upstream call with bounded retries, envelope
//! normalization, classification and write-through.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{
    fingerprint, CacheEntry, CacheMetadata, CachePolicy, ContentClassifier, DiskStore,
    MemoryLimits, MemoryStore, Params, TtlPolicy,
};
use crate::error::{FetchError, Result};
use crate::fetch::{Envelope, InFlightRegistry, Normalized, RateGovernor, Transport, UpstreamResponse};
use crate::tasks::DiskWriter;

// == Duplicate Policy ==
/// What a caller gets when its fingerprint is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Cached value if fresh, else an empty placeholder; never waits
    Placeholder,
    /// Wait for the running call, then read what it cached
    Await,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "placeholder" => Ok(DuplicatePolicy::Placeholder),
            "await" | "wait" => Ok(DuplicatePolicy::Await),
            other => Err(format!("Unknown duplicate policy '{}'", other)),
        }
    }
}

// == Fetch Config ==
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upper bound on a single upstream call
    pub upstream_timeout: Duration,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: Duration::from_secs(15),
            duplicate_policy: DuplicatePolicy::Placeholder,
        }
    }
}

// == Fetch Request ==
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub endpoint: String,
    pub params: Params,
    /// Explicit lifetime; derived from the content's priority class when None
    pub ttl: Option<TtlPolicy>,
    pub force_refresh: bool,
}

impl FetchRequest {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: Params::new(),
            ttl: None,
            force_refresh: false,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params.extend(params);
        self
    }

    pub fn ttl(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.endpoint, &self.params)
    }
}

// == Fetch Outcome ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Memory,
    Disk,
    Upstream,
    Placeholder,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Memory => "memory",
            Source::Disk => "disk",
            Source::Upstream => "upstream",
            Source::Placeholder => "placeholder",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub fingerprint: String,
    pub source: Source,
    pub envelope: Envelope,
    /// Metadata of the cached or freshly classified entry
    pub metadata: Option<CacheMetadata>,
    /// Whether this outcome was written to the cache
    pub cached: bool,
}

impl FetchOutcome {
    /// Items of the response, or `EmptyResponse` when there are none.
    pub fn into_items(self) -> Result<Vec<Value>> {
        if self.envelope.is_empty() {
            return Err(FetchError::EmptyResponse(self.envelope.get));
        }
        Ok(self.envelope.response)
    }
}

// == Cancellation ==
/// Cooperative cancellation of a caller's wait. The fetch itself carries on.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|c| *c).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// == Counters ==
#[derive(Debug, Default)]
struct FetchCounters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    upstream_calls: AtomicU64,
    deduplicated: AtomicU64,
    placeholders: AtomicU64,
    skipped_writes: AtomicU64,
    quota_hits: AtomicU64,
    gateway_timeouts: AtomicU64,
    failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Snapshot of fetch-path counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchStats {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub upstream_calls: u64,
    pub deduplicated: u64,
    pub placeholders: u64,
    pub skipped_writes: u64,
    pub quota_hits: u64,
    pub gateway_timeouts: u64,
    pub failures: u64,
}

impl FetchCounters {
    fn snapshot(&self) -> FetchStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        FetchStats {
            memory_hits: get(&self.memory_hits),
            disk_hits: get(&self.disk_hits),
            upstream_calls: get(&self.upstream_calls),
            deduplicated: get(&self.deduplicated),
            placeholders: get(&self.placeholders),
            skipped_writes: get(&self.skipped_writes),
            quota_hits: get(&self.quota_hits),
            gateway_timeouts: get(&self.gateway_timeouts),
            failures: get(&self.failures),
        }
    }
}

// == Disk Tier ==
/// Reads go straight to the store, writes through the background writer.
#[derive(Debug, Clone)]
pub struct DiskTier {
    pub store: DiskStore,
    pub writer: DiskWriter,
}

// == Fetcher ==
/// Cheap to clone; all clones share caches, registry and governor.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    memory: Arc<RwLock<MemoryStore>>,
    disk: Option<DiskTier>,
    registry: Arc<InFlightRegistry>,
    governor: Arc<RateGovernor>,
    transport: Arc<dyn Transport>,
    classifier: Arc<dyn ContentClassifier>,
    config: FetchConfig,
    counters: FetchCounters,
}

/// Result of judging one upstream answer.
enum Verdict {
    Done(Normalized),
    Quota(String),
    GatewayTimeout(u16),
}

impl Fetcher {
    pub fn builder(transport: Arc<dyn Transport>) -> FetcherBuilder {
        FetcherBuilder::new(transport)
    }

    pub fn memory(&self) -> &Arc<RwLock<MemoryStore>> {
        &self.inner.memory
    }

    pub fn disk(&self) -> Option<&DiskTier> {
        self.inner.disk.as_ref()
    }

    pub fn registry(&self) -> &Arc<InFlightRegistry> {
        &self.inner.registry
    }

    pub fn governor(&self) -> &Arc<RateGovernor> {
        &self.inner.governor
    }

    pub fn transport_name(&self) -> &'static str {
        self.inner.transport.name()
    }

    pub fn stats(&self) -> FetchStats {
        self.inner.counters.snapshot()
    }

    // == Fetch ==
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome> {
        self.fetch_with_cancel(request, None).await
    }

    /// Like `fetch`, but the wait can be abandoned through `cancel`.
    pub async fn fetch_with_cancel(
        &self,
        request: FetchRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<FetchOutcome> {
        let key = request.fingerprint();

        if !request.force_refresh {
            if let Some(outcome) = self.inner.lookup(&key).await {
                return Ok(outcome);
            }
        }

        let guard = match self.inner.registry.try_begin(&key) {
            Ok(guard) => guard,
            Err(FetchError::DuplicateRequest(_)) => {
                return self.inner.resolve_duplicate(&key, &request, cancel).await;
            }
            Err(err) => return Err(err),
        };

        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let task: JoinHandle<Result<FetchOutcome>> = tokio::spawn(async move {
            let _guard = guard;
            let result = inner.execute(&task_key, &request).await;
            if result.is_err() {
                bump(&inner.counters.failures);
            }
            result
        });

        let joined = match cancel {
            Some(token) => tokio::select! {
                joined = task => joined,
                _ = token.cancelled() => {
                    debug!(key = %key, "Caller abandoned wait, fetch continues");
                    return Err(FetchError::Cancelled(key));
                }
            },
            None => task.await,
        };

        joined.map_err(|e| FetchError::Internal(format!("fetch task failed: {}", e)))?
    }

    // == Invalidation ==
    /// Removes one request's entry from both tiers. Returns whether memory held it.
    pub async fn invalidate(&self, endpoint: &str, params: &Params) -> bool {
        let key = FetchRequest::new(endpoint)
            .with_params(params.clone())
            .fingerprint();
        self.invalidate_key(&key).await
    }

    pub async fn invalidate_key(&self, key: &str) -> bool {
        if let Some(disk) = &self.inner.disk {
            disk.writer.remove(key.to_string()).await;
        }
        self.inner.memory.write().await.remove(key)
    }

    /// Empties both tiers.
    pub async fn clear(&self) {
        if let Some(disk) = &self.inner.disk {
            disk.writer.clear().await;
        }
        self.inner.memory.write().await.clear();
        info!("Cache cleared");
    }
}

impl FetcherInner {
    // == Lookup ==
    async fn lookup(&self, key: &str) -> Option<FetchOutcome> {
        let memory_hit = self.memory.write().await.get(key);
        if let Some(entry) = memory_hit {
            if let Some(outcome) = outcome_from_entry(key, Source::Memory, &entry) {
                debug!(key, "Memory hit");
                bump(&self.counters.memory_hits);
                return Some(outcome);
            }
        }

        let disk = self.disk.as_ref()?;
        let store = disk.store.clone();
        let owned_key = key.to_string();
        let entry = tokio::task::spawn_blocking(move || store.get(&owned_key))
            .await
            .ok()
            .flatten()?;

        let outcome = outcome_from_entry(key, Source::Disk, &entry)?;
        debug!(key, "Disk hit, promoting to memory");
        bump(&self.counters.disk_hits);
        self.memory.write().await.set(key.to_string(), entry);
        Some(outcome)
    }

    // == Duplicates ==
    async fn resolve_duplicate(
        &self,
        key: &str,
        request: &FetchRequest,
        cancel: Option<&CancelToken>,
    ) -> Result<FetchOutcome> {
        bump(&self.counters.deduplicated);

        if self.config.duplicate_policy == DuplicatePolicy::Await {
            if let Some(handle) = self.registry.handle(key) {
                match cancel {
                    Some(token) => tokio::select! {
                        _ = handle.completed() => {}
                        _ = token.cancelled() => return Err(FetchError::Cancelled(key.to_string())),
                    },
                    None => handle.completed().await,
                }
            }
        }

        if let Some(outcome) = self.lookup(key).await {
            return Ok(outcome);
        }

        debug!(key, "Duplicate request answered with placeholder");
        bump(&self.counters.placeholders);
        Ok(FetchOutcome {
            fingerprint: key.to_string(),
            source: Source::Placeholder,
            envelope: Envelope::empty(&request.endpoint, &request.params),
            metadata: None,
            cached: false,
        })
    }

    // == Execute ==
    async fn execute(&self, key: &str, request: &FetchRequest) -> Result<FetchOutcome> {
        let normalized = self.call_with_retry(request).await?;
        if let Some(err) = &normalized.decode_error {
            warn!(key, endpoint = %request.endpoint, error = %err, "Substituted canonical envelope");
        }

        let envelope = normalized.envelope;
        let classification =
            self.classifier
                .classify(&request.endpoint, &request.params, &envelope.response);
        let metadata = CacheMetadata::new(classification.effective_ttl(request.ttl), &classification);
        let cacheable = classification.is_cacheable() && normalized.decode_error.is_none();

        if cacheable {
            let entry = CacheEntry::new(envelope.to_bytes()?, metadata.clone());
            self.write_through(key, entry).await;
        } else {
            debug!(key, endpoint = %request.endpoint, "Transient or undecodable response, not cached");
            bump(&self.counters.skipped_writes);
        }

        Ok(FetchOutcome {
            fingerprint: key.to_string(),
            source: Source::Upstream,
            envelope,
            metadata: Some(metadata),
            cached: cacheable,
        })
    }

    async fn write_through(&self, key: &str, entry: CacheEntry) {
        if let Some(disk) = &self.disk {
            disk.writer.write(key.to_string(), entry.clone());
        }
        let evicted = self.memory.write().await.set(key.to_string(), entry);
        if evicted > 0 {
            debug!(key, evicted, "Memory store made room");
        }
    }

    // == Upstream With Retry ==
    async fn call_with_retry(&self, request: &FetchRequest) -> Result<Normalized> {
        let limits = self.governor.config().clone();
        let mut quota_retries = 0u32;
        let mut timeout_retries = 0u32;

        loop {
            let response = self.call_once(request).await?;

            match judge(request, response)? {
                Verdict::Done(normalized) => {
                    self.governor.record_success();
                    return Ok(normalized);
                }
                Verdict::Quota(message) => {
                    bump(&self.counters.quota_hits);
                    let backoff = self.governor.record_quota_hit();
                    if quota_retries >= limits.max_quota_retries {
                        warn!(endpoint = %request.endpoint, %message, "Quota retries exhausted");
                        return Err(FetchError::RateLimitExceeded {
                            attempts: quota_retries + 1,
                        });
                    }
                    quota_retries += 1;
                    info!(
                        endpoint = %request.endpoint,
                        attempt = quota_retries,
                        backoff_secs = backoff.as_secs_f64(),
                        "Retrying after quota backoff"
                    );
                }
                Verdict::GatewayTimeout(status) => {
                    bump(&self.counters.gateway_timeouts);
                    if timeout_retries >= limits.max_timeout_retries {
                        return Err(FetchError::GatewayTimeout {
                            attempts: timeout_retries + 1,
                        });
                    }
                    timeout_retries += 1;
                    let delay = self.governor.timeout_backoff(timeout_retries);
                    warn!(
                        endpoint = %request.endpoint,
                        status,
                        attempt = timeout_retries,
                        delay_secs = delay.as_secs_f64(),
                        "Gateway timeout, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn call_once(&self, request: &FetchRequest) -> Result<UpstreamResponse> {
        let _permit = self.governor.acquire().await?;
        bump(&self.counters.upstream_calls);

        let timeout = self.config.upstream_timeout;
        match tokio::time::timeout(
            timeout,
            self.transport.call(&request.endpoint, &request.params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::NetworkError(format!(
                "upstream call timed out after {}ms",
                timeout.as_millis()
            ))),
        }
    }
}

fn judge(request: &FetchRequest, response: UpstreamResponse) -> Result<Verdict> {
    match response.status {
        429 => Ok(Verdict::Quota("HTTP 429".to_string())),
        408 | 504 | 524 => Ok(Verdict::GatewayTimeout(response.status)),
        status if !response.is_success() => Err(FetchError::InvalidResponse {
            status,
            message: String::from_utf8_lossy(&response.body)
                .chars()
                .take(200)
                .collect(),
        }),
        _ => {
            let normalized = Envelope::normalize(&request.endpoint, &request.params, &response.body);
            match normalized.envelope.quota_message() {
                Some(message) => Ok(Verdict::Quota(message)),
                None => Ok(Verdict::Done(normalized)),
            }
        }
    }
}

fn outcome_from_entry(key: &str, source: Source, entry: &CacheEntry) -> Option<FetchOutcome> {
    let envelope = Envelope::from_cached(&entry.payload)?;
    Some(FetchOutcome {
        fingerprint: key.to_string(),
        source,
        envelope,
        metadata: Some(entry.metadata.clone()),
        cached: true,
    })
}

// == Builder ==
pub struct FetcherBuilder {
    transport: Arc<dyn Transport>,
    memory: Option<Arc<RwLock<MemoryStore>>>,
    disk: Option<DiskTier>,
    registry: Option<Arc<InFlightRegistry>>,
    governor: Option<Arc<RateGovernor>>,
    classifier: Option<Arc<dyn ContentClassifier>>,
    config: FetchConfig,
}

impl FetcherBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            memory: None,
            disk: None,
            registry: None,
            governor: None,
            classifier: None,
            config: FetchConfig::default(),
        }
    }

    pub fn memory(mut self, memory: Arc<RwLock<MemoryStore>>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn disk(mut self, disk: DiskTier) -> Self {
        self.disk = Some(disk);
        self
    }

    pub fn registry(mut self, registry: Arc<InFlightRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn governor(mut self, governor: Arc<RateGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ContentClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Fetcher {
        let inner = FetcherInner {
            memory: self
                .memory
                .unwrap_or_else(|| Arc::new(RwLock::new(MemoryStore::new(MemoryLimits::default())))),
            disk: self.disk,
            registry: self.registry.unwrap_or_default(),
            governor: self
                .governor
                .unwrap_or_else(|| Arc::new(RateGovernor::new(Default::default()))),
            transport: self.transport,
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(CachePolicy::default())),
            config: self.config,
            counters: FetchCounters::default(),
        };
        Fetcher {
            inner: Arc::new(inner),
        }
    }
}

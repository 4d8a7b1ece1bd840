//! Configuration Module
//!
//! Handles loading and managing relay configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{DiskStore, MemoryLimits};
use crate::fetch::{BatchConfig, BatchMode, DuplicatePolicy, FetchConfig, RateConfig, TransportKind};

const DEFAULT_UPSTREAM_URL: &str = "https://v3.football.api-sports.io";
const DEFAULT_KEY_HEADER: &str = "x-apisports-key";

/// Relay configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    // == Cache ==
    /// Maximum number of entries the memory tier can hold
    pub max_entries: usize,
    /// Byte budget of the memory tier
    pub max_memory_bytes: usize,
    /// Disk tier directory; None disables the disk tier
    pub cache_dir: Option<PathBuf>,
    /// Background expiry sweep interval in seconds
    pub sweep_interval: u64,

    // == Server ==
    /// HTTP server port
    pub server_port: u16,

    // == Upstream ==
    pub transport: TransportKind,
    pub upstream_url: String,
    pub upstream_api_key: String,
    pub upstream_key_header: String,
    pub backend_url: String,
    pub backend_api_key: String,
    pub upstream_timeout: Duration,

    // == Pacing ==
    pub min_call_spacing: Duration,
    pub max_concurrent_calls: usize,
    pub quota_backoff: Duration,
    pub max_quota_retries: u32,
    pub timeout_backoff: Duration,
    pub max_timeout_retries: u32,
    pub duplicate_policy: DuplicatePolicy,

    // == Batch ==
    pub batch_delay: Duration,
    /// Partitions fetched together; 1 means sequential
    pub batch_group_size: usize,
    pub batch_quota_cooldown: Duration,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_ENTRIES` - Maximum memory entries (default: 1000)
    /// - `MAX_MEMORY_BYTES` - Memory byte budget (default: 64 MiB)
    /// - `CACHE_DIR` - Disk tier directory (default: platform cache dir)
    /// - `DISK_CACHE_ENABLED` - Set to `false` to run memory-only (default: true)
    /// - `SWEEP_INTERVAL` - Expiry sweep frequency in seconds (default: 300)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `UPSTREAM_TRANSPORT` - `api` or `backend` (default: api)
    /// - `UPSTREAM_URL`, `UPSTREAM_API_KEY`, `UPSTREAM_KEY_HEADER` - direct API access
    /// - `BACKEND_URL`, `BACKEND_API_KEY` - backend relay access
    /// - `UPSTREAM_TIMEOUT_MS` - Per-call timeout (default: 15000)
    /// - `MIN_CALL_SPACING_MS` - Gap between upstream calls (default: 100)
    /// - `MAX_CONCURRENT_CALLS` - Simultaneous upstream calls (default: 2)
    /// - `QUOTA_BACKOFF_SECS`, `MAX_QUOTA_RETRIES` - Quota backoff step and budget (default: 10, 3)
    /// - `TIMEOUT_BACKOFF_SECS`, `MAX_TIMEOUT_RETRIES` - Gateway timeout step and budget (default: 2, 3)
    /// - `DUPLICATE_POLICY` - `placeholder` or `await` (default: placeholder)
    /// - `BATCH_DELAY_MS`, `BATCH_GROUP_SIZE`, `BATCH_QUOTA_COOLDOWN_SECS` - Batch pacing (default: 250, 1, 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let cache_dir = if env_or("DISK_CACHE_ENABLED", true) {
            env::var("CACHE_DIR")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .or(defaults.cache_dir)
        } else {
            None
        };

        Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            max_memory_bytes: env_or("MAX_MEMORY_BYTES", defaults.max_memory_bytes),
            cache_dir,
            sweep_interval: env_or("SWEEP_INTERVAL", defaults.sweep_interval),
            server_port: env_or("SERVER_PORT", defaults.server_port),
            transport: env_or("UPSTREAM_TRANSPORT", defaults.transport),
            upstream_url: env_string("UPSTREAM_URL", &defaults.upstream_url),
            upstream_api_key: env_string("UPSTREAM_API_KEY", &defaults.upstream_api_key),
            upstream_key_header: env_string("UPSTREAM_KEY_HEADER", &defaults.upstream_key_header),
            backend_url: env_string("BACKEND_URL", &defaults.backend_url),
            backend_api_key: env_string("BACKEND_API_KEY", &defaults.backend_api_key),
            upstream_timeout: Duration::from_millis(env_or("UPSTREAM_TIMEOUT_MS", 15_000)),
            min_call_spacing: Duration::from_millis(env_or("MIN_CALL_SPACING_MS", 100)),
            max_concurrent_calls: env_or("MAX_CONCURRENT_CALLS", defaults.max_concurrent_calls),
            quota_backoff: Duration::from_secs(env_or("QUOTA_BACKOFF_SECS", 10)),
            max_quota_retries: env_or("MAX_QUOTA_RETRIES", defaults.max_quota_retries),
            timeout_backoff: Duration::from_secs(env_or("TIMEOUT_BACKOFF_SECS", 2)),
            max_timeout_retries: env_or("MAX_TIMEOUT_RETRIES", defaults.max_timeout_retries),
            duplicate_policy: env_or("DUPLICATE_POLICY", defaults.duplicate_policy),
            batch_delay: Duration::from_millis(env_or("BATCH_DELAY_MS", 250)),
            batch_group_size: env_or("BATCH_GROUP_SIZE", defaults.batch_group_size),
            batch_quota_cooldown: Duration::from_secs(env_or("BATCH_QUOTA_COOLDOWN_SECS", 60)),
        }
    }

    // == Component Configs ==
    pub fn memory_limits(&self) -> MemoryLimits {
        MemoryLimits {
            max_entries: self.max_entries,
            max_bytes: self.max_memory_bytes,
        }
    }

    pub fn rate_config(&self) -> RateConfig {
        RateConfig {
            min_spacing: self.min_call_spacing,
            max_concurrent: self.max_concurrent_calls,
            quota_backoff: self.quota_backoff,
            max_quota_retries: self.max_quota_retries,
            timeout_backoff: self.timeout_backoff,
            max_timeout_retries: self.max_timeout_retries,
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            upstream_timeout: self.upstream_timeout,
            duplicate_policy: self.duplicate_policy,
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            mode: BatchMode::from_group_size(self.batch_group_size, self.batch_delay),
            quota_cooldown: self.batch_quota_cooldown,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_memory_bytes: 64 * 1024 * 1024,
            cache_dir: DiskStore::default_dir(),
            sweep_interval: 300,
            server_port: 3000,
            transport: TransportKind::Api,
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            upstream_api_key: String::new(),
            upstream_key_header: DEFAULT_KEY_HEADER.to_string(),
            backend_url: String::new(),
            backend_api_key: String::new(),
            upstream_timeout: Duration::from_secs(15),
            min_call_spacing: Duration::from_millis(100),
            max_concurrent_calls: 2,
            quota_backoff: Duration::from_secs(10),
            max_quota_retries: 3,
            timeout_backoff: Duration::from_secs(2),
            max_timeout_retries: 3,
            duplicate_policy: DuplicatePolicy::Placeholder,
            batch_delay: Duration::from_millis(250),
            batch_group_size: 1,
            batch_quota_cooldown: Duration::from_secs(60),
        }
    }
}

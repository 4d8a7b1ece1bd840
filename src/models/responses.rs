//! Response DTOs for the relay API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::fetch::{BatchReport, FetchStats};
use crate::service::ServiceStats;

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Fresh memory hits
    pub hits: u64,
    /// Memory misses (absent or expired)
    pub misses: u64,
    /// Entries dropped to respect memory limits
    pub evictions: u64,
    /// Entries found expired on read
    pub expirations: u64,
    /// Current number of memory entries
    pub total_entries: usize,
    /// Current memory byte cost
    pub total_bytes: usize,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// Upstream calls currently running
    pub in_flight: usize,
    pub consecutive_quota_hits: u32,
    pub disk_enabled: bool,
    pub transport: &'static str,
    /// Fetch-path counters
    pub fetch: FetchStats,
}

impl From<ServiceStats> for StatsResponse {
    fn from(stats: ServiceStats) -> Self {
        Self {
            hits: stats.memory.hits,
            misses: stats.memory.misses,
            evictions: stats.memory.evictions,
            expirations: stats.memory.expirations,
            total_entries: stats.memory.total_entries,
            total_bytes: stats.memory.total_bytes,
            hit_rate: stats.memory.hit_rate(),
            in_flight: stats.in_flight,
            consecutive_quota_hits: stats.consecutive_quota_hits,
            disk_enabled: stats.disk_enabled,
            transport: stats.transport,
            fetch: stats.fetch,
        }
    }
}

/// Response body for POST /batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchResponse {
    /// Merged items of every successful partition
    pub response: Vec<Value>,
    pub report: BatchReport,
}

/// Response body for DELETE /v1/*endpoint
#[derive(Debug, Clone, Serialize)]
pub struct InvalidateResponse {
    /// Success message
    pub message: String,
    /// Fingerprint of the invalidated request
    pub key: String,
    /// Whether the memory tier held the entry
    pub removed: bool,
}

impl InvalidateResponse {
    pub fn new(key: impl Into<String>, removed: bool) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' invalidated", key),
            key,
            removed,
        }
    }
}

/// Response body for DELETE /cache
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
}

impl ClearResponse {
    pub fn new() -> Self {
        Self {
            message: "Cache cleared".to_string(),
        }
    }
}

impl Default for ClearResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    /// Creates a new ErrorResponse
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

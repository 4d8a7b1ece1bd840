//! Cache Entry Module
//!
//! Defines immutable cache entries and the metadata persisted alongside them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::{Classification, PriorityClass};

// == Cache Metadata ==
/// Metadata stored with every payload, in memory and on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Creation timestamp (Unix milliseconds)
    pub stored_at: u64,
    /// Lifetime in milliseconds, None = no expiration
    pub ttl_ms: Option<u64>,
    /// Eviction priority
    pub priority: PriorityClass,
    /// Response carried zero items
    pub is_empty: bool,
    /// Response contained in-play items
    pub has_live_content: bool,
}

impl CacheMetadata {
    // == Constructor ==
    /// Metadata stamped with the current time.
    pub fn new(ttl: Option<Duration>, classification: &Classification) -> Self {
        Self::stored_at(current_timestamp_ms(), ttl, classification)
    }

    /// Metadata with an explicit store time.
    pub fn stored_at(
        stored_at: u64,
        ttl: Option<Duration>,
        classification: &Classification,
    ) -> Self {
        Self {
            stored_at,
            ttl_ms: ttl.map(|d| d.as_millis() as u64),
            priority: classification.priority,
            is_empty: classification.is_empty,
            has_live_content: classification.has_live_content,
        }
    }

    /// Expiration timestamp (Unix milliseconds): `stored_at + ttl`.
    pub fn expires_at(&self) -> Option<u64> {
        self.ttl_ms.map(|ttl| self.stored_at.saturating_add(ttl))
    }

    // == Is Expired ==
    /// An entry is expired once the current time reaches `expires_at`.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    /// Expiry check against an explicit clock.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        match self.expires_at() {
            Some(expires) => now_ms >= expires,
            None => false,
        }
    }

    /// Remaining lifetime in milliseconds, None if it never expires.
    pub fn ttl_remaining_ms(&self) -> Option<u64> {
        self.expires_at()
            .map(|expires| expires.saturating_sub(current_timestamp_ms()))
    }
}

// == Cache Entry ==
/// A cached payload. Never patched, only replaced wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Raw response bytes
    pub payload: Vec<u8>,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    pub fn new(payload: Vec<u8>, metadata: CacheMetadata) -> Self {
        Self { payload, metadata }
    }

    pub fn is_expired(&self) -> bool {
        self.metadata.is_expired()
    }

    /// Byte cost charged against the memory budget.
    pub fn cost(&self, key: &str) -> usize {
        self.payload.len() + key.len()
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

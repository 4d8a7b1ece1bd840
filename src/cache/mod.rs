//! Cache Module
//!
//! Two-tier response cache: a bounded memory store in front of a durable disk
//! store, keyed by request fingerprints and governed by content-aware policy.

mod disk;
mod entry;
mod evictor;
mod fingerprint;
mod lru;
mod memory;
mod policy;
mod stats;

#[cfg(test)]
mod property_tests;

use std::collections::BTreeMap;

// Re-export public types
pub use disk::{decode_entry, encode_entry, DiskFormatError, DiskStore, SweepReport};
pub use entry::{current_timestamp_ms, CacheEntry, CacheMetadata};
pub use evictor::{Candidate, PriorityEvictor};
pub use fingerprint::{digest_hex, fingerprint, FingerprintBuilder};
pub use lru::LruTracker;
pub use memory::{MemoryLimits, MemoryStore};
pub use policy::{
    CachePolicy, Classification, ContentClassifier, LiveQueryRule, NarrowDateLeagueRule,
    PriorityClass, TransientEmptyRule, TtlPolicy,
};
pub use stats::CacheStats;

/// Query parameters, ordered by name.
pub type Params = BTreeMap<String, String>;

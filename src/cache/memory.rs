//! Memory Store Module
//!
//! Volatile cache tier bounded by entry count and total byte cost, with
//! expire-on-read and priority-aware eviction.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CacheEntry, CacheStats, Candidate, LruTracker, PriorityEvictor};

// == Memory Limits ==
#[derive(Debug, Clone, Copy)]
pub struct MemoryLimits {
    /// Maximum number of entries
    pub max_entries: usize,
    /// Maximum total byte cost (payload + key)
    pub max_bytes: usize,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

// == Memory Store ==
#[derive(Debug)]
pub struct MemoryStore {
    entries: HashMap<String, Arc<CacheEntry>>,
    lru: LruTracker,
    stats: CacheStats,
    evictor: PriorityEvictor,
    limits: MemoryLimits,
    total_bytes: usize,
}

impl MemoryStore {
    pub fn new(limits: MemoryLimits) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            evictor: PriorityEvictor::new(),
            limits,
            total_bytes: 0,
        }
    }

    // == Get ==
    /// Returns the entry if present and unexpired.
    ///
    /// Expired entries are removed and counted as misses.
    pub fn get(&mut self, key: &str) -> Option<Arc<CacheEntry>> {
        let entry = match self.entries.get(key) {
            Some(entry) => Arc::clone(entry),
            None => {
                self.stats.record_miss();
                return None;
            }
        };

        if entry.is_expired() {
            self.remove_entry(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }

        self.stats.record_hit();
        self.lru.touch(key);
        Some(entry)
    }

    /// Whether a fresh entry exists, without touching recency or stats.
    pub fn contains_fresh(&self, key: &str) -> bool {
        self.entries.get(key).is_some_and(|e| !e.is_expired())
    }

    // == Set ==
    /// Stores an entry, replacing any previous one for the key.
    ///
    /// Other entries may be dropped to respect the limits; returns how many.
    /// An entry larger than the whole byte budget is not stored, nor is one
    /// that would itself be the first eviction victim.
    pub fn set(&mut self, key: String, entry: CacheEntry) -> usize {
        let cost = entry.cost(&key);
        self.remove_entry(&key);

        if cost > self.limits.max_bytes || self.limits.max_entries == 0 {
            debug!(key = %key, cost, "Entry exceeds memory budget, not stored");
            self.refresh_size();
            return 0;
        }

        let entries_to_free = (self.entries.len() + 1).saturating_sub(self.limits.max_entries);
        let bytes_to_free = (self.total_bytes + cost).saturating_sub(self.limits.max_bytes);
        let incoming = Candidate {
            key: key.clone(),
            priority: entry.metadata.priority,
            expired: entry.is_expired(),
            cost,
            recency: self.lru.len(),
        };
        let victims = self.select_victims(Some(incoming), entries_to_free, bytes_to_free);
        if victims.contains(&key) {
            debug!(key = %key, "Entry ranks below everything it would displace, not stored");
            self.refresh_size();
            return 0;
        }
        let evicted = self.remove_victims(&victims);

        self.total_bytes += cost;
        self.entries.insert(key.clone(), Arc::new(entry));
        self.lru.touch(&key);
        self.refresh_size();
        evicted
    }

    // == Remove ==
    /// Removes an entry; returns whether it existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.remove_entry(key);
        self.refresh_size();
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.total_bytes = 0;
        self.refresh_size();
    }

    // == Cleanup Expired ==
    /// Removes all expired entries; returns the number removed.
    pub fn cleanup_expired(&mut self) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            self.remove_entry(key);
        }
        self.refresh_size();
        expired.len()
    }

    // == Relieve Pressure ==
    /// Evicts lowest-priority entries until total cost is at most `target_bytes`.
    pub fn relieve_pressure(&mut self, target_bytes: usize) -> usize {
        let bytes_to_free = self.total_bytes.saturating_sub(target_bytes);
        let evicted = self.evict(0, bytes_to_free);
        self.refresh_size();
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    // == Internals ==
    fn evict(&mut self, entries_to_free: usize, bytes_to_free: usize) -> usize {
        let victims = self.select_victims(None, entries_to_free, bytes_to_free);
        self.remove_victims(&victims)
    }

    /// Ranks stored entries, plus an optional incoming one, for eviction.
    fn select_victims(
        &self,
        incoming: Option<Candidate>,
        entries_to_free: usize,
        bytes_to_free: usize,
    ) -> Vec<String> {
        if entries_to_free == 0 && bytes_to_free == 0 {
            return Vec::new();
        }

        let ranks = self.lru.ranks();
        let candidates = self
            .entries
            .iter()
            .map(|(key, entry)| Candidate {
                key: key.clone(),
                priority: entry.metadata.priority,
                expired: entry.is_expired(),
                cost: entry.cost(key),
                recency: ranks.get(key.as_str()).copied().unwrap_or(0),
            })
            .chain(incoming)
            .collect();
        self.evictor.select(candidates, entries_to_free, bytes_to_free)
    }

    fn remove_victims(&mut self, victims: &[String]) -> usize {
        for key in victims {
            self.remove_entry(key);
        }
        if !victims.is_empty() {
            debug!(count = victims.len(), "Evicted memory entries");
            self.stats.record_evictions(victims.len());
        }
        victims.len()
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.total_bytes = self.total_bytes.saturating_sub(entry.cost(key));
                self.lru.remove(key);
                true
            }
            None => false,
        }
    }

    fn refresh_size(&mut self) {
        self.stats.set_size(self.entries.len(), self.total_bytes);
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheMetadata, Classification, PriorityClass};
    use std::thread::sleep;
    use std::time::Duration;

    fn entry(payload: &str, priority: PriorityClass, ttl: Option<Duration>) -> CacheEntry {
        let classification = Classification {
            priority,
            is_empty: priority == PriorityClass::Empty,
            has_live_content: priority == PriorityClass::Live,
            transient_empty: false,
        };
        CacheEntry::new(
            payload.as_bytes().to_vec(),
            CacheMetadata::new(ttl, &classification),
        )
    }

    fn store(max_entries: usize, max_bytes: usize) -> MemoryStore {
        MemoryStore::new(MemoryLimits {
            max_entries,
            max_bytes,
        })
    }

    const HOUR: Option<Duration> = Some(Duration::from_secs(3600));

    #[test]
    fn test_set_and_get_roundtrip() {
        let mut store = store(10, 1024);
        store.set("k".into(), entry("payload", PriorityClass::Today, HOUR));

        let hit = store.get("k").unwrap();
        assert_eq!(hit.payload, b"payload");
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), "payload".len() + 1);
    }

    #[test]
    fn test_get_missing_is_miss() {
        let mut store = store(10, 1024);
        assert!(store.get("missing").is_none());
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_expired_entry_evicted_on_read() {
        let mut store = store(10, 1024);
        store.set(
            "k".into(),
            entry("v", PriorityClass::Live, Some(Duration::from_millis(50))),
        );
        assert!(store.get("k").is_some());

        sleep(Duration::from_millis(80));

        assert!(store.get("k").is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.total_bytes(), 0);
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn test_overwrite_replaces_cost() {
        let mut store = store(10, 1024);
        store.set("k".into(), entry("short", PriorityClass::Old, HOUR));
        store.set("k".into(), entry("much longer", PriorityClass::Old, HOUR));

        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), "much longer".len() + 1);
        assert_eq!(store.get("k").unwrap().payload, b"much longer");
    }

    #[test]
    fn test_count_limit_evicts_lowest_priority() {
        let mut store = store(2, 1024);
        store.set("live".into(), entry("a", PriorityClass::Live, HOUR));
        store.set("old".into(), entry("b", PriorityClass::Old, HOUR));
        let evicted = store.set("today".into(), entry("c", PriorityClass::Today, HOUR));

        assert_eq!(evicted, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("live").is_some());
        assert!(store.get("today").is_some());
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_byte_limit_is_respected() {
        let mut store = store(100, 30);
        for i in 0..10 {
            store.set(format!("k{}", i), entry("0123456789", PriorityClass::Old, HOUR));
            assert!(store.total_bytes() <= 30);
        }
        assert!(store.len() <= 2);
    }

    #[test]
    fn test_oversized_entry_not_stored() {
        let mut store = store(10, 8);
        store.set("k".into(), entry("far too large", PriorityClass::Live, HOUR));
        assert!(store.is_empty());
    }

    #[test]
    fn test_relieve_pressure_keeps_live() {
        let mut store = store(10, 1024);
        store.set("empty".into(), entry("xxxxxxxxx", PriorityClass::Empty, HOUR));
        store.set("old".into(), entry("xxxxxxxxx", PriorityClass::Old, HOUR));
        store.set("live".into(), entry("xxxxxxxxx", PriorityClass::Live, HOUR));

        let live_cost = "xxxxxxxxx".len() + "live".len();
        let evicted = store.relieve_pressure(live_cost);
        assert_eq!(evicted, 2);
        assert!(store.contains_fresh("live"));
        assert!(!store.contains_fresh("old"));
        assert!(!store.contains_fresh("empty"));
        assert_eq!(store.total_bytes(), live_cost);
    }

    #[test]
    fn test_low_priority_entry_does_not_displace_live() {
        let mut store = store(2, 1024);
        store.set("live1".into(), entry("a", PriorityClass::Live, HOUR));
        store.set("live2".into(), entry("b", PriorityClass::Live, HOUR));

        let evicted = store.set("empty".into(), entry("c", PriorityClass::Empty, HOUR));

        assert_eq!(evicted, 0);
        assert!(store.contains_fresh("live1"));
        assert!(store.contains_fresh("live2"));
        assert!(!store.contains_fresh("empty"));
        assert_eq!(store.stats().evictions, 0);
    }

    #[test]
    fn test_equal_priority_entry_displaces_least_recent() {
        let mut store = store(2, 1024);
        store.set("first".into(), entry("a", PriorityClass::Live, HOUR));
        store.set("second".into(), entry("b", PriorityClass::Live, HOUR));

        store.set("third".into(), entry("c", PriorityClass::Live, HOUR));

        assert!(!store.contains_fresh("first"));
        assert!(store.contains_fresh("second"));
        assert!(store.contains_fresh("third"));
    }

    #[test]
    fn test_cleanup_expired() {
        let mut store = store(10, 1024);
        store.set(
            "short".into(),
            entry("v", PriorityClass::Live, Some(Duration::from_millis(20))),
        );
        store.set("long".into(), entry("v", PriorityClass::Old, HOUR));

        sleep(Duration::from_millis(50));

        assert_eq!(store.cleanup_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.contains_fresh("long"));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut store = store(10, 1024);
        store.set("a".into(), entry("v", PriorityClass::Old, HOUR));
        store.set("b".into(), entry("v", PriorityClass::Old, HOUR));

        assert!(store.remove("a"));
        assert!(!store.remove("a"));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.total_bytes(), 0);
    }
}

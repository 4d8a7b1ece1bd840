//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the cache invariants over generated inputs.

use proptest::prelude::*;
use std::time::Duration;

use crate::cache::{
    decode_entry, encode_entry, CacheEntry, CacheMetadata, Classification, DiskStore,
    FingerprintBuilder, MemoryLimits, MemoryStore, PriorityClass,
};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 16;
const TEST_MAX_BYTES: usize = 2048;

// == Helpers ==
fn classification(priority: PriorityClass) -> Classification {
    Classification {
        priority,
        is_empty: priority == PriorityClass::Empty,
        has_live_content: priority == PriorityClass::Live,
        transient_empty: false,
    }
}

fn entry(priority: PriorityClass, payload: Vec<u8>) -> CacheEntry {
    CacheEntry::new(
        payload,
        CacheMetadata::new(Some(Duration::from_secs(3600)), &classification(priority)),
    )
}

// == Strategies ==
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,24}".prop_map(|s| s)
}

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

fn priority_strategy() -> impl Strategy<Value = PriorityClass> {
    prop_oneof![
        Just(PriorityClass::Empty),
        Just(PriorityClass::Old),
        Just(PriorityClass::Recent),
        Just(PriorityClass::Upcoming),
        Just(PriorityClass::Today),
        Just(PriorityClass::Live),
    ]
}

/// A parameter list together with a shuffled copy of itself.
fn shuffled_params_strategy() -> impl Strategy<Value = (Vec<(String, String)>, Vec<(String, String)>)> {
    prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9-]{0,10}", 0..8).prop_flat_map(|map| {
        let pairs: Vec<(String, String)> = map.into_iter().collect();
        (Just(pairs.clone()), Just(pairs).prop_shuffle())
    })
}

#[derive(Debug, Clone)]
enum CacheOp {
    Set { key: String, payload: Vec<u8> },
    Get { key: String },
    Remove { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), payload_strategy()).prop_map(|(key, payload)| CacheOp::Set { key, payload }),
        key_strategy().prop_map(|key| CacheOp::Get { key }),
        key_strategy().prop_map(|key| CacheOp::Remove { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Equal parameter sets in any order produce the same fingerprint.
    #[test]
    fn prop_fingerprint_ignores_parameter_order(
        endpoint in "[a-z]{1,12}",
        (pairs, shuffled) in shuffled_params_strategy()
    ) {
        let a = FingerprintBuilder::new(endpoint.as_str()).params(pairs).build();
        let b = FingerprintBuilder::new(endpoint.as_str()).params(shuffled).build();
        prop_assert_eq!(a.len(), 64);
        prop_assert_eq!(a, b);
    }

    // Changing one value changes the fingerprint.
    #[test]
    fn prop_fingerprint_distinguishes_values(
        endpoint in "[a-z]{1,12}",
        key in "[a-z]{1,8}",
        v1 in "[a-z0-9]{1,8}",
        v2 in "[a-z0-9]{1,8}"
    ) {
        prop_assume!(v1 != v2);
        let a = FingerprintBuilder::new(endpoint.as_str()).param(key.as_str(), v1).build();
        let b = FingerprintBuilder::new(endpoint.as_str()).param(key.as_str(), v2).build();
        prop_assert_ne!(a, b);
    }

    // A stored, unexpired entry reads back unchanged.
    #[test]
    fn prop_memory_round_trip(
        key in key_strategy(),
        payload in payload_strategy(),
        priority in priority_strategy()
    ) {
        let mut store = MemoryStore::new(MemoryLimits::default());
        let stored = entry(priority, payload);
        store.set(key.clone(), stored.clone());

        let read = store.get(&key);
        prop_assert!(read.is_some());
        let read = read.unwrap();
        prop_assert_eq!(read.as_ref(), &stored);
    }

    // Count and byte limits hold after any sequence of operations, and the
    // statistics count every lookup exactly once.
    #[test]
    fn prop_limits_and_statistics(ops in prop::collection::vec(cache_op_strategy(), 1..80)) {
        let mut store = MemoryStore::new(MemoryLimits {
            max_entries: TEST_MAX_ENTRIES,
            max_bytes: TEST_MAX_BYTES,
        });
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Set { key, payload } => {
                    store.set(key, entry(PriorityClass::Old, payload));
                }
                CacheOp::Get { key } => match store.get(&key) {
                    Some(_) => expected_hits += 1,
                    None => expected_misses += 1,
                },
                CacheOp::Remove { key } => {
                    store.remove(&key);
                }
            }

            prop_assert!(store.len() <= TEST_MAX_ENTRIES);
            prop_assert!(store.total_bytes() <= TEST_MAX_BYTES);
        }

        let stats = store.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, store.len(), "Total entries mismatch");
        prop_assert_eq!(stats.total_bytes, store.total_bytes(), "Total bytes mismatch");
    }

    // Under count pressure the highest-priority entry outlives lower ones.
    #[test]
    fn prop_priority_eviction_keeps_highest_class(
        priorities in prop::collection::vec(priority_strategy(), 1..30)
    ) {
        let mut store = MemoryStore::new(MemoryLimits {
            max_entries: 4,
            max_bytes: TEST_MAX_BYTES,
        });
        store.set("live".to_string(), entry(PriorityClass::Live, b"live".to_vec()));

        for (i, priority) in priorities.into_iter().enumerate() {
            let priority = if priority == PriorityClass::Live { PriorityClass::Today } else { priority };
            store.set(format!("k{}", i), entry(priority, b"x".to_vec()));
        }

        prop_assert!(store.contains_fresh("live"));
        prop_assert!(store.len() <= 4);
    }

    // Expiry is exactly `now >= stored_at + ttl`.
    #[test]
    fn prop_expiry_boundary(stored_at in 0u64..1_000_000, ttl_ms in 1u64..100_000, now in 0u64..2_000_000) {
        let metadata = CacheMetadata::stored_at(
            stored_at,
            Some(Duration::from_millis(ttl_ms)),
            &classification(PriorityClass::Old),
        );
        prop_assert_eq!(metadata.expires_at(), Some(stored_at + ttl_ms));
        prop_assert_eq!(metadata.is_expired_at(now), now >= stored_at + ttl_ms);
    }

    // The on-disk framing preserves payload and metadata.
    #[test]
    fn prop_disk_framing_round_trip(payload in payload_strategy(), priority in priority_strategy()) {
        let original = entry(priority, payload);
        let decoded = decode_entry(&encode_entry(&original).unwrap()).unwrap();
        prop_assert_eq!(decoded, original);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    // Entries written to a directory are read back by a fresh store on it.
    #[test]
    fn prop_disk_store_round_trip(
        entries in prop::collection::btree_map(key_strategy(), payload_strategy(), 1..6)
    ) {
        let dir = tempfile::TempDir::new().unwrap();
        let writer = DiskStore::new(dir.path());
        for (key, payload) in &entries {
            prop_assert!(writer.set(key, &entry(PriorityClass::Recent, payload.clone())));
        }

        let reader = DiskStore::new(dir.path());
        for (key, payload) in &entries {
            let read = reader.get(key);
            prop_assert!(read.is_some());
            let read = read.unwrap();
            prop_assert_eq!(&read.payload, payload);
        }
    }
}

// == Additional Unit Tests for Edge Cases ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_entry_not_stored() {
        let mut store = MemoryStore::new(MemoryLimits {
            max_entries: TEST_MAX_ENTRIES,
            max_bytes: 8,
        });
        store.set("key".to_string(), entry(PriorityClass::Live, vec![0; 64]));
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_victim_goes_before_low_priority() {
        let mut store = MemoryStore::new(MemoryLimits {
            max_entries: 2,
            max_bytes: TEST_MAX_BYTES,
        });
        let expired = CacheEntry::new(
            b"old".to_vec(),
            CacheMetadata::stored_at(1_000, Some(Duration::from_secs(1)), &classification(PriorityClass::Live)),
        );
        store.set("expired_live".to_string(), expired);
        store.set("empty".to_string(), entry(PriorityClass::Empty, b"e".to_vec()));
        store.set("new".to_string(), entry(PriorityClass::Old, b"n".to_vec()));

        assert!(store.contains_fresh("empty"));
        assert!(store.contains_fresh("new"));
        assert_eq!(store.len(), 2);
    }
}

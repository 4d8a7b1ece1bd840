//! Recency Tracker Module
//!
//! Records access order so the evictor can break priority ties.

use std::collections::{HashMap, VecDeque};

// == Recency Tracker ==
/// Tracks access order of memory-resident fingerprints.
///
/// Keys are stored in a VecDeque where:
/// - Front = Most recently used
/// - Back = Least recently used
#[derive(Debug, Default)]
pub struct LruTracker {
    order: VecDeque<String>,
}

impl LruTracker {
    pub fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    // == Touch ==
    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &str) {
        self.remove(key);
        self.order.push_front(key.to_string());
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }

    // == Recency Ranks ==
    /// Maps each key to its age rank: 0 = least recently used.
    pub fn ranks(&self) -> HashMap<&str, usize> {
        self.order
            .iter()
            .rev()
            .enumerate()
            .map(|(rank, key)| (key.as_str(), rank))
            .collect()
    }

    /// Least recently used key, if any.
    pub fn peek_oldest(&self) -> Option<&String> {
        self.order.back()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.order.iter().any(|k| k == key)
    }
}

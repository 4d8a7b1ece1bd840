//! Priority Evictor Module
//!
//! Chooses which memory entries to drop when the store is over budget.

use crate::cache::PriorityClass;

// == Candidate ==
/// An entry considered for eviction.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub key: String,
    pub priority: PriorityClass,
    pub expired: bool,
    /// Byte cost of the entry
    pub cost: usize,
    /// 0 = least recently used
    pub recency: usize,
}

// == Priority Evictor ==
/// Orders victims: expired entries first, then lowest priority class, then
/// least recently used.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityEvictor;

impl PriorityEvictor {
    pub fn new() -> Self {
        Self
    }

    /// Picks victims until at least `entries_to_free` entries and
    /// `bytes_to_free` bytes are released, or candidates run out.
    pub fn select(
        &self,
        mut candidates: Vec<Candidate>,
        entries_to_free: usize,
        bytes_to_free: usize,
    ) -> Vec<String> {
        candidates.sort_by(|a, b| {
            b.expired
                .cmp(&a.expired)
                .then(a.priority.cmp(&b.priority))
                .then(a.recency.cmp(&b.recency))
        });

        let mut victims = Vec::new();
        let mut freed_entries = 0;
        let mut freed_bytes = 0;

        for candidate in candidates {
            if freed_entries >= entries_to_free && freed_bytes >= bytes_to_free {
                break;
            }
            freed_entries += 1;
            freed_bytes += candidate.cost;
            victims.push(candidate.key);
        }

        victims
    }
}

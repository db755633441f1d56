//! Processed-message counts keyed by processor identity

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Per-run map from processor identifier to the number of messages it has discarded
///
/// Counts only ever grow. Entries are never removed during a run, so a detector reading an
/// identifier always sees a value at least as large as its previous read.
#[derive(Debug, Default)]
pub struct ProcessingCounter {
    counts: DashMap<String, AtomicU64>,
}

impl ProcessingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry at zero if it does not exist yet
    pub fn register(&self, identifier: &str) {
        if !self.counts.contains_key(identifier) {
            self.counts
                .entry(identifier.to_string())
                .or_insert_with(|| AtomicU64::new(0));
        }
    }

    /// Increment the count for `identifier`, returning the new value
    pub fn increment(&self, identifier: &str) -> u64 {
        // Fast path under a shared shard lock
        if let Some(count) = self.counts.get(identifier) {
            return count.fetch_add(1, Ordering::AcqRel) + 1;
        }

        self.counts
            .entry(identifier.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::AcqRel)
            + 1
    }

    /// Current count; 0 for an identifier that has not been seen
    pub fn get(&self, identifier: &str) -> u64 {
        self.counts
            .get(identifier)
            .map(|count| count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

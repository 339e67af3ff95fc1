//! Per-instance start progress.

use dashmap::DashMap;
use std::hash::Hash;
use tracing::warn;

/// Counts, per live instance, how many protocols (in direct order) finished
/// their start callback successfully.
///
/// Lifecycle events of one instance are serialized by the transport; distinct
/// instances may start and stop concurrently, which `DashMap` handles per key.
/// No guard outlives a method call, so callbacks may re-enter the funnel.
pub(crate) struct ProgressTracker<K> {
    counters: DashMap<K, usize>,
}

impl<K> ProgressTracker<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Creates the counter for a start attempt.
    pub fn begin(&self, key: K) {
        if let Some(previous) = self.counters.insert(key.clone(), 0) {
            warn!(
                "Instance {:?} started again without stopping; discarding progress {}",
                key, previous
            );
        }
    }

    /// Records one more successfully started protocol.
    pub fn advance(&self, key: &K) {
        *self.counters.entry(key.clone()).or_insert(0) += 1;
    }

    pub fn get(&self, key: &K) -> Option<usize> {
        self.counters.get(key).map(|count| *count)
    }

    /// Removes and returns the counter.
    pub fn take(&self, key: &K) -> Option<usize> {
        self.counters.remove(key).map(|(_, count)| count)
    }

    pub fn keys(&self) -> Vec<K> {
        self.counters.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_lifecycle() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.get(&1), None);

        tracker.begin(1);
        assert_eq!(tracker.get(&1), Some(0));
        tracker.advance(&1);
        tracker.advance(&1);
        assert_eq!(tracker.get(&1), Some(2));

        assert_eq!(tracker.take(&1), Some(2));
        assert_eq!(tracker.take(&1), None);
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = ProgressTracker::new();
        tracker.begin("a");
        tracker.begin("b");
        tracker.advance(&"a");

        assert_eq!(tracker.get(&"a"), Some(1));
        assert_eq!(tracker.get(&"b"), Some(0));

        let mut keys = tracker.keys();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_restart_resets_progress() {
        let tracker = ProgressTracker::new();
        tracker.begin(7u32);
        tracker.advance(&7);
        tracker.begin(7);
        assert_eq!(tracker.get(&7), Some(0));
    }
}

//! Keyed deadlines for debounce and throttle.
//!
//! Deadlines are plain Unix-millisecond values read from a
//! [`Clock`](rootline_types::Clock); nothing here sleeps. Owners ask for the
//! next deadline, sleep however suits them, then pop what is due.

use std::collections::BTreeMap;

/// Pending deadlines, at most one per key.
#[derive(Debug, Clone)]
pub struct DelayQueue<K: Ord + Clone> {
    pending: BTreeMap<K, u64>,
}

impl<K: Ord + Clone> Default for DelayQueue<K> {
    fn default() -> Self {
        Self { pending: BTreeMap::new() }
    }
}

impl<K: Ord + Clone> DelayQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline for `key`, replacing any earlier one (debounce).
    pub fn schedule(&mut self, key: K, at: u64) {
        self.pending.insert(key, at);
    }

    /// Set the deadline for `key` unless an earlier one is already pending
    /// (throttle).
    pub fn schedule_earliest(&mut self, key: K, at: u64) {
        let deadline = self.pending.entry(key).or_insert(at);
        *deadline = (*deadline).min(at);
    }

    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<u64> {
        self.pending.get(key).copied()
    }

    pub fn is_due(&self, key: &K, now: u64) -> bool {
        self.pending.get(key).is_some_and(|at| *at <= now)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.values().min().copied()
    }

    /// Remove and return every key whose deadline has passed, earliest first.
    pub fn pop_due(&mut self, now: u64) -> Vec<K> {
        let mut due: Vec<(u64, K)> = self
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(k, at)| (*at, k.clone()))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        for (_, key) in &due {
            self.pending.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_replaces_deadline() {
        let mut queue = DelayQueue::new();
        queue.schedule("ada", 100);
        queue.schedule("ada", 400);
        assert_eq!(queue.deadline(&"ada"), Some(400));
        assert!(queue.pop_due(399).is_empty());
        assert_eq!(queue.pop_due(400), vec!["ada"]);
        assert!(!queue.is_pending(&"ada"));
    }

    #[test]
    fn test_schedule_earliest_keeps_first() {
        let mut queue = DelayQueue::new();
        queue.schedule_earliest(1, 300);
        queue.schedule_earliest(1, 500);
        assert_eq!(queue.deadline(&1), Some(300));
        queue.schedule_earliest(1, 200);
        assert_eq!(queue.deadline(&1), Some(200));
    }

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut queue = DelayQueue::new();
        queue.schedule('b', 20);
        queue.schedule('a', 30);
        queue.schedule('c', 10);
        queue.schedule('d', 99);
        assert_eq!(queue.next_deadline(), Some(10));
        assert_eq!(queue.pop_due(50), vec!['c', 'b', 'a']);
        assert_eq!(queue.len(), 1);
        assert!(queue.cancel(&'d'));
        assert!(queue.is_empty());
    }
}

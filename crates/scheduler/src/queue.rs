//! PriorityQueue - binary heap with stable ties

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;

struct Slot<K, T> {
    key: K,
    seq: u64,
    item: T,
}

impl<K: Ord, T> PartialEq for Slot<K, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<K: Ord, T> Eq for Slot<K, T> {}

impl<K: Ord, T> PartialOrd for Slot<K, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Ord, T> Ord for Slot<K, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Min-queue ordered by `(key, insertion sequence)`
pub struct PriorityQueue<K, T> {
    heap: BinaryHeap<Reverse<Slot<K, T>>>,
    next_seq: u64,
}

impl<K: Ord, T> PriorityQueue<K, T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, key: K, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(Slot { key, seq, item }));
    }

    /// Remove the smallest entry
    pub fn pop(&mut self) -> Option<(K, T)> {
        self.heap.pop().map(|Reverse(slot)| (slot.key, slot.item))
    }

    pub fn peek_key(&self) -> Option<&K> {
        self.heap.peek().map(|Reverse(slot)| &slot.key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every entry, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.heap.len();
        self.heap.clear();
        dropped
    }
}

impl<K: Ord, T> Default for PriorityQueue<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> fmt::Debug for PriorityQueue<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityQueue")
            .field("len", &self.heap.len())
            .field("next_seq", &self.next_seq)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgedPriority, SessionFirst};
    use contracts::TaskPriority;

    fn drain<K: Ord, T>(queue: &mut PriorityQueue<K, T>) -> Vec<T> {
        std::iter::from_fn(|| queue.pop().map(|(_, item)| item)).collect()
    }

    #[test]
    fn test_equal_keys_pop_in_insertion_order() {
        let mut queue = PriorityQueue::new();
        for i in 0..5 {
            queue.push(0u8, i);
        }
        assert_eq!(drain(&mut queue), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_critical_submitted_after_low_runs_first() {
        let mut queue = PriorityQueue::new();
        queue.push(AgedPriority::new(TaskPriority::Low, 0), "low");
        queue.push(AgedPriority::new(TaskPriority::Critical, 1), "critical");
        assert_eq!(drain(&mut queue), vec!["critical", "low"]);
    }

    #[test]
    fn test_aged_low_runs_before_fresh_high() {
        let mut queue = PriorityQueue::new();
        queue.push(AgedPriority::new(TaskPriority::Low, 0), "low");
        queue.push(AgedPriority::new(TaskPriority::High, 70_000), "high");
        assert_eq!(drain(&mut queue), vec!["low", "high"]);
    }

    #[test]
    fn test_interleaved_sessions_precede_logs_stably() {
        let mut queue = PriorityQueue::new();
        let submitted = [
            ("log-1", false),
            ("session-1", true),
            ("log-2", false),
            ("log-3", false),
            ("session-2", true),
            ("session-3", true),
            ("log-4", false),
        ];
        for (name, is_session) in submitted {
            queue.push(SessionFirst::new(is_session), name);
        }
        assert_eq!(
            drain(&mut queue),
            vec!["session-1", "session-2", "session-3", "log-1", "log-2", "log-3", "log-4"]
        );
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut queue = PriorityQueue::new();
        queue.push(1, ());
        queue.push(2, ());
        assert_eq!(queue.peek_key(), Some(&1));
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;

/// Bounded set of recently seen ids.
///
/// A `VecDeque` keeps insertion order and a `HashSet` gives O(1) lookups.
/// At capacity the oldest entry is evicted one at a time; the set is never
/// cleared wholesale, which would let every old id through again at once.
#[derive(Debug)]
pub struct SeenCache<T> {
    order: VecDeque<T>,
    set: HashSet<T>,
    capacity: usize,
}

impl<T: Eq + Hash + Clone> SeenCache<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub fn contains(&self, id: &T) -> bool {
        self.set.contains(id)
    }

    /// Record `id`. Returns false if it was already present.
    pub fn insert(&mut self, id: T) -> bool {
        if self.set.contains(&id) {
            return false;
        }
        while self.set.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.set.remove(&oldest);
                }
                None => break,
            }
        }
        self.set.insert(id.clone());
        self.order.push_back(id);
        true
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_new_ids() {
        let mut seen = SeenCache::new(4);
        assert!(seen.insert(1));
        assert!(!seen.insert(1));
        assert!(seen.contains(&1));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let mut seen = SeenCache::new(3);
        for id in 0..3 {
            seen.insert(id);
        }
        seen.insert(3);
        assert_eq!(seen.len(), 3);
        assert!(!seen.contains(&0));
        assert!(seen.contains(&1));
        assert!(seen.contains(&3));
    }

    #[test]
    fn test_reinsert_does_not_refresh_position() {
        let mut seen = SeenCache::new(2);
        seen.insert("a");
        seen.insert("b");
        seen.insert("a");
        seen.insert("c");
        // "a" was the oldest insertion and goes first.
        assert!(!seen.contains(&"a"));
        assert!(seen.contains(&"b"));
        assert!(seen.contains(&"c"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut seen = SeenCache::new(0);
        assert!(seen.insert(5));
        assert!(seen.contains(&5));
        assert!(seen.insert(6));
        assert!(!seen.contains(&5));
    }
}

//! Insertion-ordered reachability sets.
//!
//! The worklist and the retention tracer both need sets with O(1) membership
//! and deterministic iteration in insertion order, so reruns over the same
//! program visit entities in the same order.

use std::collections::HashSet;
use std::hash::Hash;

#[derive(Debug)]
pub struct RetainedSet<T> {
    items: Vec<T>,
    seen: HashSet<T>,
}

impl<T: Copy + Eq + Hash> RetainedSet<T> {
    pub fn new() -> Self {
        RetainedSet {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Insert an item. Returns true if it was not already present.
    pub fn insert(&mut self, item: T) -> bool {
        if self.seen.insert(item) {
            self.items.push(item);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, item: &T) -> bool {
        self.seen.contains(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Copy + Eq + Hash> Default for RetainedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_novelty() {
        let mut set = RetainedSet::new();
        assert!(set.insert(3u32));
        assert!(!set.insert(3u32));
        assert!(set.insert(5u32));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&3));
        assert!(!set.contains(&4));
    }

    #[test]
    fn test_iteration_is_insertion_ordered() {
        let mut set = RetainedSet::new();
        for v in [9u32, 2, 7, 2, 4] {
            set.insert(v);
        }
        let order: Vec<u32> = set.iter().copied().collect();
        assert_eq!(order, vec![9, 2, 7, 4]);
    }
}

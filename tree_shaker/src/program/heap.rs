//! Heap collaborator.
//!
//! The tree shaker never walks the heap itself; it only needs per-class live
//! instance counts, and the ability to force a full collection and join any
//! concurrent sweeping before it inspects those counts. The embedder (or a
//! test) owns allocation bookkeeping.

use std::collections::HashMap;

use super::ClassId;

#[derive(Debug, Default)]
pub struct Heap {
    live: HashMap<ClassId, usize>,
    collections: usize,
    sweepers_joined: bool,
}

impl Heap {
    pub fn new() -> Self {
        Heap::default()
    }

    /// Record an allocation of `class`.
    pub fn allocate(&mut self, class: ClassId) {
        *self.live.entry(class).or_insert(0) += 1;
        self.sweepers_joined = false;
    }

    /// Record that an instance of `class` became unreachable; the next full
    /// collection reclaims it.
    pub fn release(&mut self, class: ClassId) {
        let count = self.live.entry(class).or_insert(0);
        assert!(*count > 0, "releasing an instance that was never allocated");
        *count -= 1;
        self.sweepers_joined = false;
    }

    /// Force a full garbage collection. Sweeping may continue concurrently;
    /// callers that inspect instance counts must join it first.
    pub fn collect_all_garbage(&mut self) {
        self.collections += 1;
    }

    /// Block until any concurrent sweeper tasks have finished.
    pub fn wait_for_sweeper_tasks(&mut self) {
        self.sweepers_joined = true;
    }

    /// Live instance count of `class`. Only meaningful after a full
    /// collection with sweepers joined.
    pub fn instance_count(&self, class: ClassId) -> usize {
        assert!(
            self.sweepers_joined,
            "instance counts inspected while sweeper tasks may still run"
        );
        self.live.get(&class).copied().unwrap_or(0)
    }

    pub fn collections(&self) -> usize {
        self.collections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let mut heap = Heap::new();
        let cls = ClassId(3);
        heap.allocate(cls);
        heap.allocate(cls);
        heap.release(cls);
        heap.collect_all_garbage();
        heap.wait_for_sweeper_tasks();
        assert_eq!(heap.instance_count(cls), 1);
        assert_eq!(heap.collections(), 1);
    }

    #[test]
    #[should_panic(expected = "sweeper tasks")]
    fn test_count_requires_joined_sweepers() {
        let mut heap = Heap::new();
        heap.allocate(ClassId(0));
        let _ = heap.instance_count(ClassId(0));
    }
}

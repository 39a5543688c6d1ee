//! Bounded per-category event store
//!
//! Append-only FIFO buffer with a fixed cap. Readers take snapshots: an
//! immutable copy of the record handles taken under the read lock, so an
//! append can never be observed half-written and iteration never blocks
//! the writer.

use super::types::Category;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable point-in-time view of a store
pub type Snapshot<T> = Arc<[Arc<T>]>;

#[derive(Debug)]
pub struct CategoryStore<T> {
    category: Category,
    capacity: usize,
    records: RwLock<VecDeque<Arc<T>>>,
    evicted: AtomicU64,
}

impl<T> CategoryStore<T> {
    /// Create an empty store; a zero capacity is raised to 1
    pub fn new(category: Category, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            category,
            capacity,
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            evicted: AtomicU64::new(0),
        }
    }

    /// Add a record at the tail, evicting from the head past capacity
    ///
    /// Returns the number of records evicted by this append.
    pub fn append(&self, record: T) -> usize {
        let record = Arc::new(record);
        let mut records = self.records.write();
        records.push_back(record);

        let mut evicted = 0;
        while records.len() > self.capacity {
            records.pop_front();
            evicted += 1;
        }
        drop(records);

        if evicted > 0 {
            self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            log::trace!("🧹 {} store evicted {} record(s)", self.category, evicted);
        }
        evicted
    }

    /// Copy the current contents, oldest first
    pub fn snapshot(&self) -> Snapshot<T> {
        let records = self.records.read();
        records.iter().cloned().collect()
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Records evicted since creation
    pub fn evicted_total(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_append_within_capacity() {
        let store = CategoryStore::new(Category::Sales, 4);
        for i in 0..3 {
            assert_eq!(store.append(i), 0);
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.evicted_total(), 0);
    }

    #[test]
    fn test_bounded_store_evicts_oldest_first() {
        // Test: cap + k appends leave exactly cap records, the oldest k gone
        let cap = 5;
        let k = 3;
        let store = CategoryStore::new(Category::Inventory, cap);
        for i in 0..(cap + k) {
            store.append(i);
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), cap);
        let values: Vec<usize> = snapshot.iter().map(|r| **r).collect();
        assert_eq!(values, vec![3, 4, 5, 6, 7]);
        assert_eq!(store.evicted_total(), k as u64);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_appends() {
        let store = CategoryStore::new(Category::Social, 10);
        store.append("a");
        store.append("b");

        let snapshot = store.snapshot();
        store.append("c");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let store = CategoryStore::new(Category::Performance, 0);
        store.append(1);
        store.append(2);
        assert_eq!(store.capacity(), 1);
        assert_eq!(*store.snapshot()[0], 2);
    }

    #[test]
    fn test_concurrent_append_and_snapshot() {
        // Scenario: a writer appends while readers snapshot; every snapshot
        // is a contiguous, ordered run of the appended sequence
        let store = Arc::new(CategoryStore::new(Category::UserActivity, 64));

        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    store.append(i);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = store.snapshot();
                        assert!(snapshot.len() <= 64);
                        for pair in snapshot.windows(2) {
                            assert_eq!(*pair[1], *pair[0] + 1);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(store.len(), 64);
        assert_eq!(*store.snapshot()[63], 9_999);
    }
}

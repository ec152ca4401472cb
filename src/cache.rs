//! Bounded recency cache in front of `ContentStore` reads. Holds raw
//! payload bytes keyed by entry id; fully reconstructible from the store,
//! so losing an entry only ever costs a reload.

use std::num::NonZeroUsize;

use lru::LruCache;

pub const DEFAULT_CACHE_CAPACITY: usize = 10;

pub struct ContentCache {
    entries: LruCache<i64, Vec<u8>>,
}

impl ContentCache {
    pub fn new(capacity: usize) -> Self {
        let capacity =
            NonZeroUsize::new(capacity.max(1)).expect("capacity is clamped to at least 1");
        ContentCache {
            entries: LruCache::new(capacity),
        }
    }

    /// Hit promotes the entry to most-recently-used. Miss returns `None`;
    /// the owning layer loads through `ContentStore` and calls `put`.
    pub fn get(&mut self, id: i64) -> Option<Vec<u8>> {
        self.entries.get(&id).cloned()
    }

    /// Inserts (or refreshes) at the most-recently-used position, evicting
    /// the least-recently-used entry when over capacity.
    pub fn put(&mut self, id: i64, bytes: Vec<u8>) {
        self.entries.put(id, bytes);
    }

    /// Must be called whenever the owning record is deleted, so a reused
    /// lookup never serves bytes for an id that no longer exists.
    pub fn invalidate(&mut self, id: i64) {
        if self.entries.pop(&id).is_some() {
            log::debug!("cache entry {} invalidated", id);
        }
    }

    /// Live-tunable. Lowering the capacity evicts down to the new bound
    /// immediately.
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity =
            NonZeroUsize::new(capacity.max(1)).expect("capacity is clamped to at least 1");
        self.entries.resize(capacity);
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let mut cache = ContentCache::new(4);
        assert_eq!(cache.get(1), None);
        cache.put(1, b"one".to_vec());
        assert_eq!(cache.get(1).as_deref(), Some(b"one".as_ref()));
    }

    #[test]
    fn inserting_past_capacity_evicts_the_least_recently_used() {
        let mut cache = ContentCache::new(3);
        for id in 1..=3 {
            cache.put(id, vec![id as u8]);
        }
        cache.put(4, vec![4]);
        assert_eq!(cache.get(1), None);
        for id in 2..=4 {
            assert!(cache.get(id).is_some(), "id {id} should survive");
        }
    }

    #[test]
    fn a_get_protects_an_entry_from_eviction() {
        let mut cache = ContentCache::new(3);
        for id in 1..=3 {
            cache.put(id, vec![id as u8]);
        }
        // Touch 1 so that 2 becomes the eviction candidate.
        assert!(cache.get(1).is_some());
        cache.put(4, vec![4]);
        assert!(cache.get(1).is_some());
        assert_eq!(cache.get(2), None);
    }

    #[test]
    fn lowering_capacity_evicts_immediately() {
        let mut cache = ContentCache::new(5);
        for id in 1..=5 {
            cache.put(id, vec![id as u8]);
        }
        cache.set_capacity(2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.capacity(), 2);
        // The two most recently used survive.
        assert!(cache.get(4).is_some());
        assert!(cache.get(5).is_some());
        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn invalidate_removes_the_entry() {
        let mut cache = ContentCache::new(2);
        cache.put(7, b"stale".to_vec());
        cache.invalidate(7);
        assert_eq!(cache.get(7), None);
        // Invalidating an absent id is a no-op.
        cache.invalidate(7);
    }
}

//! # Schema LRU Cache
//!
//! Bounded name-keyed cache for table schemas and index descriptors, so hot
//! catalog lookups skip the B+Tree. Eviction is exact least-recently-used:
//! every access stamps the entry with a globally increasing clock, and the
//! entry with the smallest stamp is evicted when the cache is full. Eviction
//! is an O(n) sweep, which is fine at the catalog's capacities (hundreds of
//! entries); a linked-list LRU would buy nothing here.
//!
//! The cache is not self-synchronizing — the catalog wraps each instance in
//! a `parking_lot::Mutex`.

use hashbrown::HashMap;

#[derive(Debug)]
pub struct LruCache<V> {
    entries: HashMap<String, (V, u64)>,
    clock: u64,
    capacity: usize,
}

impl<V: Clone> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity.min(64)),
            clock: 0,
            capacity: capacity.max(1),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Fetches and freshens an entry.
    pub fn get(&mut self, name: &str) -> Option<V> {
        let stamp = self.tick();
        let (value, last_used) = self.entries.get_mut(name)?;
        *last_used = stamp;
        Some(value.clone())
    }

    /// Inserts or replaces an entry, evicting the least-recently-used one
    /// if the cache is full.
    pub fn put(&mut self, name: &str, value: V) {
        if !self.entries.contains_key(name) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        let stamp = self.tick();
        self.entries.insert(name.to_owned(), (value, stamp));
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, (_, last_used))| *last_used)
            .map(|(name, _)| name.clone());
        if let Some(name) = oldest {
            self.entries.remove(&name);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

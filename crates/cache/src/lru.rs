//! Bounded LRU registry of ids holding a live resource
//!
//! The registry is an ordered set: the least recently visible id sits at the
//! front, the most recently visible at the back. It never evicts on its own;
//! the caller decides which entry may go (see [`LruRegistry::evict_where`]).

use std::collections::VecDeque;

/// Statistics about registry usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of ids currently registered
    pub live: usize,

    /// Maximum number of ids allowed
    pub capacity: usize,

    /// Number of ids removed through `evict_where`
    pub evictions: u64,

    /// Number of inserts refused because the registry was full
    pub rejected: u64,
}

/// Ordered set of live ids with a hard capacity
///
/// # Example
///
/// ```
/// use clipgrid_cache::LruRegistry;
///
/// let mut registry = LruRegistry::new(2);
/// assert!(registry.try_insert("a"));
/// assert!(registry.try_insert("b"));
/// assert!(!registry.try_insert("c")); // full
///
/// // "a" becomes most recent, so "b" is now the eviction candidate
/// registry.touch(&"a");
/// assert_eq!(registry.evict_where(|_| true), Some("b"));
/// assert!(registry.try_insert("c"));
/// ```
#[derive(Debug, Clone)]
pub struct LruRegistry<K> {
    /// front = least recently visible, back = most recently visible
    order: VecDeque<K>,
    capacity: usize,
    evictions: u64,
    rejected: u64,
}

impl<K: Clone + PartialEq> LruRegistry<K> {
    /// Create an empty registry that holds at most `capacity` ids
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            capacity,
            evictions: 0,
            rejected: 0,
        }
    }

    /// Maximum number of ids
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity.
    ///
    /// Shrinking below the current size does not drop entries; `is_full`
    /// stays true until the caller frees enough of them.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// True when no further id can be inserted
    pub fn is_full(&self) -> bool {
        self.order.len() >= self.capacity
    }

    pub fn contains(&self, key: &K) -> bool {
        self.order.iter().any(|k| k == key)
    }

    /// Insert `key` as the most recent entry.
    ///
    /// An id already present is only touched. Returns `false` (and records a
    /// rejection) when the id is absent and the registry is full.
    pub fn try_insert(&mut self, key: K) -> bool {
        if self.touch(&key) {
            return true;
        }
        if self.is_full() {
            self.rejected += 1;
            return false;
        }
        self.order.push_back(key);
        true
    }

    /// Insert `key` as the least recent entry, for ids that were never on
    /// screen.
    ///
    /// An id already present keeps its position. Full registries reject
    /// like [`try_insert`](Self::try_insert).
    pub fn try_insert_cold(&mut self, key: K) -> bool {
        if self.contains(&key) {
            return true;
        }
        if self.is_full() {
            self.rejected += 1;
            return false;
        }
        self.order.push_front(key);
        true
    }

    /// Mark `key` as most recently visible. Returns `false` if absent.
    pub fn touch(&mut self, key: &K) -> bool {
        match self.order.iter().position(|k| k == key) {
            Some(pos) => {
                if let Some(k) = self.order.remove(pos) {
                    self.order.push_back(k);
                }
                true
            }
            None => false,
        }
    }

    /// Remove `key`. Returns `false` if it was not registered.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.order.iter().position(|k| k == key) {
            Some(pos) => {
                self.order.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Remove and return the least recently visible id satisfying `eligible`.
    ///
    /// Returns `None` when no registered id qualifies; nothing is removed in
    /// that case.
    pub fn evict_where<F>(&mut self, eligible: F) -> Option<K>
    where
        F: Fn(&K) -> bool,
    {
        let pos = self.order.iter().position(|k| eligible(k))?;
        let evicted = self.order.remove(pos)?;
        self.evictions += 1;
        Some(evicted)
    }

    /// Iterate from least to most recently visible
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&mut self) {
        self.order.clear();
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.order.len(),
            capacity: self.capacity,
            evictions: self.evictions,
            rejected: self.rejected,
        }
    }
}

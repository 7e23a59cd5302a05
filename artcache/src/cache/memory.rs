//! In-memory cache tier with LRU eviction.
//!
//! Entries live in a slab of nodes linked into a doubly-linked recency list
//! (head = most recently used, tail = least recently used). A `HashMap` maps
//! keys to slab slots, so lookups, promotions and evictions are all O(1).
//!
//! The tier enforces two budgets at insert time:
//! - a total cost budget (bytes by default, see [`MemoryCache::with_cost_fn`])
//! - a maximum number of entries
//!
//! Expiration is checked lazily on read; expired entries are dropped when
//! they are encountered.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::cache::types::CacheEntry;

/// Weighs a payload against the cost budget.
pub type CostFn = Arc<dyn Fn(&Bytes) -> usize + Send + Sync>;

/// Sentinel for "no link".
const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node {
    entry: CacheEntry,
    prev: usize,
    next: usize,
}

/// Recency-ordered entry storage. Not thread-safe on its own.
#[derive(Debug, Default)]
struct LruList {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    head: usize,
    tail: usize,
    total_cost: usize,
}

impl LruList {
    fn new() -> Self {
        Self {
            head: NIL,
            tail: NIL,
            ..Default::default()
        }
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, slot: usize) -> Option<&Node> {
        self.slots.get(slot).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node> {
        self.slots.get_mut(slot).and_then(|n| n.as_mut())
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node(slot) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match self.node_mut(prev) {
            Some(p) => p.next = next,
            None => self.head = next,
        }
        match self.node_mut(next) {
            Some(n) => n.prev = prev,
            None => self.tail = prev,
        }
        if let Some(node) = self.node_mut(slot) {
            node.prev = NIL;
            node.next = NIL;
        }
    }

    fn push_front(&mut self, slot: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(slot) {
            node.prev = NIL;
            node.next = old_head;
        }
        match self.node_mut(old_head) {
            Some(h) => h.prev = slot,
            None => self.tail = slot,
        }
        self.head = slot;
    }

    fn get(&mut self, key: &str) -> Option<&CacheEntry> {
        let slot = *self.index.get(key)?;
        self.unlink(slot);
        self.push_front(slot);
        self.node(slot).map(|n| &n.entry)
    }

    fn peek(&self, key: &str) -> Option<&CacheEntry> {
        let slot = *self.index.get(key)?;
        self.node(slot).map(|n| &n.entry)
    }

    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        let replaced = self.remove(&entry.key);
        let key = entry.key.clone();
        self.total_cost += entry.cost;

        let node = Node {
            entry,
            prev: NIL,
            next: NIL,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        self.index.insert(key, slot);
        self.push_front(slot);
        replaced
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        let node = self.slots.get_mut(slot)?.take()?;
        self.free.push(slot);
        self.total_cost = self.total_cost.saturating_sub(node.entry.cost);
        Some(node.entry)
    }

    fn pop_back(&mut self) -> Option<CacheEntry> {
        let key = self.node(self.tail)?.entry.key.clone();
        self.remove(&key)
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    /// Keys from most to least recently used.
    fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(node) = self.node(cursor) {
            keys.push(node.entry.key.clone());
            cursor = node.next;
        }
        keys
    }
}

/// Result of a memory lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryLookup {
    /// Live entry found
    Hit(CacheEntry),
    /// Entry was present but expired; it has been dropped
    Expired,
    /// No entry for the key
    Miss,
}

/// Bounded in-memory cache tier.
///
/// All operations take a single internal mutex and never suspend.
pub struct MemoryCache {
    inner: Mutex<LruList>,
    max_cost: usize,
    max_entries: usize,
    cost_fn: CostFn,
}

impl MemoryCache {
    /// Create a memory tier with a cost budget (bytes) and an entry budget.
    pub fn new(max_cost: usize, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(LruList::new()),
            max_cost,
            max_entries,
            cost_fn: Arc::new(|payload: &Bytes| payload.len()),
        }
    }

    /// Replace the default byte-length cost function.
    pub fn with_cost_fn(mut self, cost_fn: CostFn) -> Self {
        self.cost_fn = cost_fn;
        self
    }

    /// Look up a key, promoting it to most recently used on hit.
    pub fn get(&self, key: &str, now: SystemTime) -> MemoryLookup {
        let mut inner = self.inner.lock();

        let expired = match inner.get(key) {
            Some(entry) if !entry.is_expired(now) => return MemoryLookup::Hit(entry.clone()),
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.remove(key);
            MemoryLookup::Expired
        } else {
            MemoryLookup::Miss
        }
    }

    /// Insert or replace an entry, evicting least recently used entries
    /// until both budgets are satisfied.
    ///
    /// Returns the number of entries evicted to make room. An entry whose
    /// cost alone exceeds the budget is not stored.
    pub fn put(&self, key: &str, payload: Bytes, expires_at: SystemTime) -> usize {
        let cost = (self.cost_fn)(&payload);
        let mut inner = self.inner.lock();

        if cost > self.max_cost || self.max_entries == 0 {
            inner.remove(key);
            tracing::debug!(
                key,
                cost,
                max_cost = self.max_cost,
                "Entry exceeds memory budget, not cached in memory"
            );
            return 0;
        }

        // Drop the old version first so it does not count against the budget.
        inner.remove(key);

        let mut evicted = 0;
        while inner.len() + 1 > self.max_entries || inner.total_cost + cost > self.max_cost {
            match inner.pop_back() {
                Some(victim) => {
                    evicted += 1;
                    tracing::trace!(key = %victim.key, "Evicted from memory tier");
                }
                None => break,
            }
        }

        inner.insert(CacheEntry {
            key: key.to_string(),
            payload,
            expires_at,
            cost,
        });
        evicted
    }

    /// Remove an entry. Returns true if it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Check for a live entry without touching recency.
    pub fn contains(&self, key: &str, now: SystemTime) -> bool {
        self.inner
            .lock()
            .peek(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Number of entries currently held (including not-yet-noticed expired ones).
    pub fn entry_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Total cost of held entries.
    pub fn total_cost(&self) -> usize {
        self.inner.lock().total_cost
    }

    /// Cost budget.
    pub fn max_cost(&self) -> usize {
        self.max_cost
    }

    /// Entry budget.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Keys ordered from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.inner.lock().keys()
    }
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("max_cost", &self.max_cost)
            .field("max_entries", &self.max_entries)
            .field("entry_count", &self.entry_count())
            .field("total_cost", &self.total_cost())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn far_future() -> SystemTime {
        SystemTime::now() + Duration::from_secs(3600)
    }

    fn payload(len: usize) -> Bytes {
        Bytes::from(vec![0u8; len])
    }

    #[test]
    fn test_memory_cache_new() {
        let cache = MemoryCache::new(1_000_000, 100);
        assert_eq!(cache.max_cost(), 1_000_000);
        assert_eq!(cache.max_entries(), 100);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_memory_cache_put_and_get() {
        let cache = MemoryCache::new(1_000_000, 100);
        let now = SystemTime::now();
        cache.put("k1", Bytes::from_static(&[1, 2, 3]), far_future());

        match cache.get("k1", now) {
            MemoryLookup::Hit(entry) => assert_eq!(&entry.payload[..], &[1, 2, 3]),
            other => panic!("expected hit, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_cache_miss() {
        let cache = MemoryCache::new(1_000_000, 100);
        assert_eq!(cache.get("missing", SystemTime::now()), MemoryLookup::Miss);
    }

    #[test]
    fn test_memory_cache_expired_entry_is_dropped() {
        let cache = MemoryCache::new(1_000_000, 100);
        let now = SystemTime::now();
        cache.put("k1", payload(10), now + Duration::from_secs(1));

        let later = now + Duration::from_secs(2);
        assert_eq!(cache.get("k1", later), MemoryLookup::Expired);
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_memory_cache_size_tracking() {
        let cache = MemoryCache::new(1_000_000, 100);
        cache.put("k1", payload(1000), far_future());
        assert_eq!(cache.total_cost(), 1000);

        cache.put("k2", payload(2000), far_future());
        assert_eq!(cache.total_cost(), 3000);
        assert_eq!(cache.entry_count(), 2);
    }

    #[test]
    fn test_memory_cache_replace_existing() {
        let cache = MemoryCache::new(1_000_000, 100);
        cache.put("k1", payload(3), far_future());
        cache.put("k1", payload(5), far_future());

        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.total_cost(), 5);
    }

    #[test]
    fn test_memory_cache_lru_eviction_by_cost() {
        let cache = MemoryCache::new(2500, 100);

        cache.put("k1", payload(1000), far_future());
        cache.put("k2", payload(1000), far_future());
        let evicted = cache.put("k3", payload(1000), far_future());

        assert_eq!(evicted, 1);
        let now = SystemTime::now();
        assert!(!cache.contains("k1", now), "Oldest entry should be evicted");
        assert!(cache.contains("k2", now));
        assert!(cache.contains("k3", now));
        assert!(cache.total_cost() <= 2500);
    }

    #[test]
    fn test_memory_cache_lru_eviction_by_count() {
        let cache = MemoryCache::new(1_000_000, 2);

        for i in 1..=5 {
            cache.put(&format!("k{}", i), payload(1), far_future());
        }

        assert_eq!(cache.entry_count(), 2);
        assert_eq!(cache.keys_by_recency(), vec!["k5", "k4"]);
    }

    #[test]
    fn test_memory_cache_access_updates_lru() {
        let cache = MemoryCache::new(2500, 100);
        let now = SystemTime::now();

        cache.put("k1", payload(1000), far_future());
        cache.put("k2", payload(1000), far_future());

        // Touch k1 so k2 becomes least recently used
        assert!(matches!(cache.get("k1", now), MemoryLookup::Hit(_)));

        cache.put("k3", payload(1000), far_future());

        assert!(cache.contains("k1", now), "Accessed entry should remain");
        assert!(!cache.contains("k2", now), "LRU entry should be evicted");
        assert!(cache.contains("k3", now));
    }

    #[test]
    fn test_memory_cache_contains_does_not_promote() {
        let cache = MemoryCache::new(1_000_000, 2);
        let now = SystemTime::now();

        cache.put("k1", payload(1), far_future());
        cache.put("k2", payload(1), far_future());
        assert!(cache.contains("k1", now));
        cache.put("k3", payload(1), far_future());

        assert!(!cache.contains("k1", now));
    }

    #[test]
    fn test_memory_cache_oversized_entry_not_stored() {
        let cache = MemoryCache::new(1000, 100);
        cache.put("small", payload(10), far_future());

        let evicted = cache.put("huge", payload(5000), far_future());

        assert_eq!(evicted, 0);
        assert!(!cache.contains("huge", SystemTime::now()));
        assert!(cache.contains("small", SystemTime::now()));
    }

    #[test]
    fn test_memory_cache_oversized_replacement_drops_old_value() {
        let cache = MemoryCache::new(1000, 100);
        cache.put("k", payload(10), far_future());
        cache.put("k", payload(5000), far_future());

        assert!(!cache.contains("k", SystemTime::now()));
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_memory_cache_remove_and_slot_reuse() {
        let cache = MemoryCache::new(1_000_000, 100);
        cache.put("k1", payload(10), far_future());
        cache.put("k2", payload(10), far_future());

        assert!(cache.remove("k1"));
        assert!(!cache.remove("k1"));

        cache.put("k3", payload(10), far_future());
        assert_eq!(cache.keys_by_recency(), vec!["k3", "k2"]);
        assert_eq!(cache.total_cost(), 20);
    }

    #[test]
    fn test_memory_cache_clear() {
        let cache = MemoryCache::new(1_000_000, 100);
        cache.put("k1", payload(10), far_future());
        cache.clear();

        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.total_cost(), 0);
        assert!(cache.keys_by_recency().is_empty());
    }

    #[test]
    fn test_memory_cache_custom_cost_fn() {
        let cache = MemoryCache::new(10, 100).with_cost_fn(Arc::new(|_: &Bytes| 4));

        cache.put("a", payload(1000), far_future());
        cache.put("b", payload(1000), far_future());
        cache.put("c", payload(1000), far_future());

        assert_eq!(cache.entry_count(), 2);
        assert_eq!(cache.total_cost(), 8);
    }

    #[test]
    fn test_lru_list_links_stay_consistent() {
        let mut list = LruList::new();
        for key in ["a", "b", "c", "d"] {
            list.insert(CacheEntry::new(key, payload(1), far_future()));
        }
        list.get("b");
        list.remove("c");
        list.pop_back();

        assert_eq!(list.keys(), vec!["b", "d"]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_memory_cache_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MemoryCache>();
    }
}

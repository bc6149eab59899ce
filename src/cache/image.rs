//! Bounded image cache with LRU eviction
//!
//! Byte-capacity-limited cache of decoded image payloads. Capacity is not
//! fixed at startup: the quality controller shrinks and grows it as the
//! rendering mode changes.
//!
//! Shared between the UI thread and background decode workers. Every
//! operation takes one mutex for O(1) work (hash lookup plus a splice in an
//! intrusive recency list); payloads released by eviction are dropped after
//! the lock is released.

use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

/// Rejected write outcome for [`BoundedImageCache::put`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The entry alone is larger than the whole cache
    EntryTooLarge {
        key: String,
        size_bytes: u64,
        capacity_bytes: u64,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntryTooLarge {
                key,
                size_bytes,
                capacity_bytes,
            } => write!(
                f,
                "Entry {} is too large: {} bytes exceeds cache capacity of {} bytes",
                key, size_bytes, capacity_bytes
            ),
        }
    }
}

impl std::error::Error for CacheError {}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of entries currently cached
    pub entries: usize,
    /// Sum of entry sizes in bytes
    pub used_bytes: u64,
    /// Current capacity in bytes
    pub capacity_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to make room or after a capacity shrink
    pub evictions: u64,
    /// Puts refused with `EntryTooLarge`
    pub rejected: u64,
}

impl CacheStats {
    /// Cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Used fraction of capacity (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity_bytes == 0 {
            0.0
        } else {
            self.used_bytes as f64 / self.capacity_bytes as f64
        }
    }
}

struct Node {
    key: String,
    payload: Bytes,
    size: u64,
    /// Towards most recently used
    prev: Option<usize>,
    /// Towards least recently used
    next: Option<usize>,
}

/// Slab of nodes linked into a recency list, head = MRU, tail = LRU.
#[derive(Default)]
struct Entries {
    index: HashMap<String, usize>,
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Entries {
    fn len(&self) -> usize {
        self.index.len()
    }

    fn node(&self, idx: usize) -> Option<&Node> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    fn detach(&mut self, idx: usize) {
        let Some((prev, next)) = self.node(idx).map(|n| (n.prev, n.next)) else {
            return;
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.node_mut(h) {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn touch(&mut self, idx: usize) {
        if self.head != Some(idx) {
            self.detach(idx);
            self.push_front(idx);
        }
    }

    fn insert_front(&mut self, key: String, payload: Bytes, size: u64) {
        let node = Node {
            key: key.clone(),
            payload,
            size,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.push_front(idx);
    }

    fn remove_at(&mut self, idx: usize) -> Option<Node> {
        self.detach(idx);
        let node = self.slots.get_mut(idx)?.take()?;
        self.index.remove(&node.key);
        self.free.push(idx);
        Some(node)
    }

    fn pop_lru(&mut self) -> Option<Node> {
        let idx = self.tail?;
        self.remove_at(idx)
    }

    /// Keys from most to least recently used.
    fn keys_by_recency(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = self.node(idx) else { break };
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }
}

struct CacheState {
    entries: Entries,
    capacity_bytes: u64,
    used_bytes: u64,
    stats: CacheStats,
}

impl CacheState {
    /// Evict from the LRU end until usage fits capacity.
    fn evict_to_capacity(&mut self) -> Vec<Bytes> {
        let mut evicted = Vec::new();
        while self.used_bytes > self.capacity_bytes {
            let Some(node) = self.entries.pop_lru() else { break };
            self.used_bytes = self.used_bytes.saturating_sub(node.size);
            self.stats.evictions += 1;
            evicted.push(node.payload);
        }
        evicted
    }
}

/// Byte-bounded LRU cache of decoded images.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use renderpace::cache::BoundedImageCache;
///
/// let cache = BoundedImageCache::new(100);
/// cache.put("a", Bytes::from_static(b"decoded"), 40).unwrap();
/// cache.put("b", Bytes::from_static(b"decoded"), 40).unwrap();
/// cache.get("a");
/// cache.put("c", Bytes::from_static(b"decoded"), 40).unwrap();
///
/// // "b" was least recently used
/// assert!(!cache.contains("b"));
/// assert_eq!(cache.used_bytes(), 80);
/// ```
pub struct BoundedImageCache {
    state: Mutex<CacheState>,
}

impl BoundedImageCache {
    /// Create an empty cache holding at most `capacity_bytes`.
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: Entries::default(),
                capacity_bytes,
                used_bytes: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Image cache lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Set the capacity, evicting LRU entries if usage no longer fits.
    pub fn configure(&self, capacity_bytes: u64) {
        let evicted = {
            let mut state = self.lock();
            if state.capacity_bytes == capacity_bytes {
                return;
            }
            debug!(
                "Image cache capacity {} -> {} bytes",
                state.capacity_bytes, capacity_bytes
            );
            state.capacity_bytes = capacity_bytes;
            state.evict_to_capacity()
        };
        if !evicted.is_empty() {
            debug!("Capacity shrink evicted {} entries", evicted.len());
        }
    }

    /// Insert or replace `key`, marking it most recently used.
    ///
    /// Entries larger than the whole capacity are refused and leave the
    /// cache untouched.
    pub fn put(
        &self,
        key: impl Into<String>,
        payload: Bytes,
        size_bytes: u64,
    ) -> Result<(), CacheError> {
        let key = key.into();
        let (replaced, evicted) = {
            let mut state = self.lock();
            if size_bytes > state.capacity_bytes {
                state.stats.rejected += 1;
                return Err(CacheError::EntryTooLarge {
                    key,
                    size_bytes,
                    capacity_bytes: state.capacity_bytes,
                });
            }

            let replaced = match state.entries.index.get(&key).copied() {
                Some(idx) => state.entries.remove_at(idx),
                None => None,
            };
            if let Some(old) = &replaced {
                state.used_bytes = state.used_bytes.saturating_sub(old.size);
            }

            state.entries.insert_front(key, payload, size_bytes);
            state.used_bytes += size_bytes;
            let evicted = state.evict_to_capacity();
            (replaced, evicted)
        };
        drop(replaced);
        drop(evicted);
        Ok(())
    }

    /// Payload for `key`, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut state = self.lock();
        match state.entries.index.get(key).copied() {
            Some(idx) => {
                state.entries.touch(idx);
                state.stats.hits += 1;
                state.entries.node(idx).map(|n| n.payload.clone())
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Whether `key` is cached. Does not affect recency.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.index.contains_key(key)
    }

    /// Remove a single entry. Returns `true` if it was present.
    pub fn remove(&self, key: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            let Some(idx) = state.entries.index.get(key).copied() else {
                return false;
            };
            let node = state.entries.remove_at(idx);
            if let Some(node) = &node {
                state.used_bytes = state.used_bytes.saturating_sub(node.size);
            }
            node
        };
        removed.is_some()
    }

    /// Remove every entry.
    pub fn evict_all(&self) {
        let old = {
            let mut state = self.lock();
            let count = state.entries.len() as u64;
            state.stats.evictions += count;
            state.used_bytes = 0;
            std::mem::take(&mut state.entries)
        };
        if old.len() > 0 {
            debug!("Evicted all {} image cache entries", old.len());
        }
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.lock().capacity_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.lock().used_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            used_bytes: state.used_bytes,
            capacity_bytes: state.capacity_bytes,
            ..state.stats
        }
    }

    /// Cached keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<String> {
        self.lock().entries.keys_by_recency()
    }
}

impl fmt::Debug for BoundedImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("BoundedImageCache")
            .field("entries", &stats.entries)
            .field("used_bytes", &stats.used_bytes)
            .field("capacity_bytes", &stats.capacity_bytes)
            .finish()
    }
}

//! Capacity-bounded LRU cache with per-entry modification times.
//!
//! `BoundedCache` wraps an `lru::LruCache` behind a `parking_lot::Mutex`.
//! Every operation takes the lock once, so a `get` that refreshes recency
//! and a `put` that evicts are each atomic with respect to other callers.
//!
//! Each entry remembers the wall-clock time of its most recent `put`.
//! The directory indexer compares that time against a directory's mtime
//! to decide whether a cached listing is still valid.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use lru::LruCache;
use parking_lot::Mutex;

struct Slot<V> {
    value: V,
    last_modified: SystemTime,
}

/// Point-in-time statistics for a [`BoundedCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Entries pushed out by capacity pressure.
    pub evictions: u64,
    /// Entries currently held.
    pub entries: usize,
    /// Maximum number of entries.
    pub capacity: usize,
}

impl CacheStats {
    /// Fraction of lookups that were hits, or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} entries, {} hits, {} misses, {} evictions ({:.1}% hit rate)",
            self.entries,
            self.capacity,
            self.hits,
            self.misses,
            self.evictions,
            self.hit_rate() * 100.0
        )
    }
}

/// Recency-ordered key/value store holding at most `capacity` entries.
///
/// Values are cloned out on read, so `V` is normally an `Arc` or another
/// cheap handle.
pub struct BoundedCache<K, V> {
    entries: Mutex<LruCache<K, Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up `key`, marking it most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_with_time(key).map(|(value, _)| value)
    }

    /// Look up `key` together with the time it was last stored.
    ///
    /// Both values are read under one lock acquisition.
    pub fn get_with_time(&self, key: &K) -> Option<(V, SystemTime)> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(slot) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some((slot.value.clone(), slot.last_modified))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` under `key`, stamping it with the current time.
    pub fn put(&self, key: K, value: V) {
        self.put_at(key, value, SystemTime::now());
    }

    /// Store `value` under `key` with an explicit modification time.
    ///
    /// Evicts the least recently used entry when the cache is full.
    pub fn put_at(&self, key: K, value: V, last_modified: SystemTime) {
        let mut entries = self.entries.lock();
        let replaced = entries.push(
            key.clone(),
            Slot {
                value,
                last_modified,
            },
        );
        if let Some((old_key, _)) = replaced {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Return the value for `key`, inserting the result of `make` first if
    /// the key is absent. The check and the insert happen under one lock.
    pub fn get_or_insert_with<F>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> V,
    {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return slot.value.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let value = make();
        let replaced = entries.push(
            key,
            Slot {
                value: value.clone(),
                last_modified: SystemTime::now(),
            },
        );
        if replaced.is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Remove `key`, returning its value if it was present.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.entries.lock().pop(key).map(|slot| slot.value)
    }

    /// Check for `key` without touching its recency.
    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    /// Time of the most recent `put` for `key`.
    pub fn last_modified(&self, key: &K) -> Option<SystemTime> {
        self.entries.lock().peek(key).map(|slot| slot.last_modified)
    }

    /// Snapshot of the keys, most recently used first.
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    /// Drop every entry. Statistics are kept.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

impl<K: Hash + Eq, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("BoundedCache")
            .field("len", &entries.len())
            .field("capacity", &entries.cap())
            .finish()
    }
}

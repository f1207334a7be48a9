//! Per-handle arena of decoded index blocks.
//!
//! Entries are keyed by their position in the index (not by file offset),
//! are never mutated once inserted, and are never evicted while the handle
//! is open. Decoding happens outside the lock; when two threads race on the
//! same key the first insert wins and the other result is dropped, which is
//! harmless because both decoded the same bytes. Once closed, the cache
//! stays empty: a decode still in flight gets its value back uncached.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Hit/miss counters for a [`BlockCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to decode.
    pub misses: u64,
    /// Blocks currently held.
    pub entries: usize,
}

/// Insert-once map of shared, immutable decoded blocks.
pub struct BlockCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
}

struct CacheInner<K, V> {
    entries: HashMap<K, Arc<V>>,
    hits: u64,
    misses: u64,
    closed: bool,
}

impl<K: Eq + Hash, V> Default for BlockCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for BlockCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BlockCache")
            .field("entries", &inner.entries.len())
            .field("hits", &inner.hits)
            .field("misses", &inner.misses)
            .finish()
    }
}

impl<K: Eq + Hash, V> BlockCache<K, V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                closed: false,
            }),
        }
    }

    /// Look up a decoded block, counting the hit or miss.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        let found = inner.entries.get(key).cloned();
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Insert `value` unless another thread got there first; returns the
    /// entry that ends up in the cache. After [`close`](Self::close) the
    /// value is returned without being stored.
    pub fn insert_if_absent(&self, key: K, value: V) -> Arc<V> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Arc::new(value);
        }
        inner
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(value))
            .clone()
    }

    /// Return the cached block for `key`, decoding it with `decode` on a
    /// miss. The lock is not held while `decode` runs.
    pub fn get_or_try_insert_with<F>(&self, key: K, decode: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = decode()?;
        Ok(self.insert_if_absent(key, value))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and stop caching. Outstanding `Arc`s stay valid.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;

    #[test]
    fn decodes_once_then_hits() {
        let cache: BlockCache<(usize, u64), Vec<u8>> = BlockCache::new();
        let mut calls = 0;
        let a = cache
            .get_or_try_insert_with((1, 0), || {
                calls += 1;
                Ok(vec![1, 2, 3])
            })
            .unwrap();
        let b = cache
            .get_or_try_insert_with((1, 0), || {
                calls += 1;
                Ok(vec![9])
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&a, &b));
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn first_insert_wins() {
        let cache: BlockCache<u32, &'static str> = BlockCache::new();
        let first = cache.insert_if_absent(7, "first");
        let second = cache.insert_if_absent(7, "second");
        assert_eq!(*first, "first");
        assert_eq!(*second, "first");
    }

    #[test]
    fn failed_decode_is_not_cached() {
        let cache: BlockCache<u32, u32> = BlockCache::new();
        let err = cache.get_or_try_insert_with(1, || Err(FormatError::HandleClosed));
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert_eq!(*cache.get_or_try_insert_with(1, || Ok(5)).unwrap(), 5);
    }

    #[test]
    fn close_keeps_outstanding_handles() {
        let cache: BlockCache<u32, u32> = BlockCache::new();
        let held = cache.insert_if_absent(1, 10);
        cache.close();
        assert!(cache.is_empty());
        assert_eq!(*held, 10);
    }

    #[test]
    fn decode_finishing_after_close_is_not_cached() {
        let cache: BlockCache<u32, u32> = BlockCache::new();
        let value = cache
            .get_or_try_insert_with(1, || {
                cache.close();
                Ok(5)
            })
            .unwrap();
        assert_eq!(*value, 5);
        assert!(cache.is_empty());
        assert_eq!(*cache.insert_if_absent(2, 6), 6);
        assert!(cache.is_empty());
    }
}

//! LRU cache of fetched COG blocks.

use lru::LruCache;
use std::num::NonZeroUsize;

/// Key for cached blocks: (IFD index, linear block index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub ifd_idx: usize,
    pub block_idx: usize,
}

/// LRU cache storing compressed block bytes as fetched.
pub struct BlockCache {
    inner: LruCache<BlockKey, Vec<u8>>,
}

impl BlockCache {
    /// Create a cache holding up to `capacity` blocks (at least one).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(cap),
        }
    }

    pub fn get(&mut self, key: &BlockKey) -> Option<&Vec<u8>> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.inner.contains(key)
    }

    pub fn insert(&mut self, key: BlockKey, data: Vec<u8>) {
        self.inner.put(key, data);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

//! In-memory tile cache keyed by `z/x/y`.
//!
//! ## LRU eviction
//!
//! When the cache exceeds `capacity`, the least-recently-accessed tile is
//! evicted. Both `get` and `put` count as an access.

use std::collections::HashMap;
use std::sync::Arc;

use crate::tiles::{Tile, TileCoord};

/// Default maximum number of cached tiles before LRU eviction.
pub const DEFAULT_CAPACITY: usize = 256;

struct CacheEntry {
    tile: Arc<Tile>,
    /// Logical clock value of the last access.
    last_accessed: u64,
}

/// Bounded LRU over generated tiles.
pub struct TileCache {
    index: HashMap<String, CacheEntry>,
    capacity: usize,
    clock: u64,
    hits: u64,
    misses: u64,
}

impl TileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            index: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Look up a tile and mark it as recently used.
    pub fn get(&mut self, coord: TileCoord) -> Option<Arc<Tile>> {
        let now = self.tick();
        match self.index.get_mut(&coord.key()) {
            Some(entry) => {
                entry.last_accessed = now;
                self.hits += 1;
                Some(Arc::clone(&entry.tile))
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert or replace a tile, evicting the LRU entry if at capacity.
    pub fn put(&mut self, tile: Tile) -> Arc<Tile> {
        let key = tile.coord.key();
        if self.index.len() >= self.capacity && !self.index.contains_key(&key) {
            self.evict_lru();
        }
        let now = self.tick();
        let tile = Arc::new(tile);
        self.index.insert(
            key,
            CacheEntry {
                tile: Arc::clone(&tile),
                last_accessed: now,
            },
        );
        tile
    }

    pub fn contains(&self, coord: TileCoord) -> bool {
        self.index.contains_key(&coord.key())
    }

    pub fn invalidate(&mut self, coord: TileCoord) -> bool {
        self.index.remove(&coord.key()).is_some()
    }

    pub fn clear(&mut self) {
        self.index.clear();
    }

    fn evict_lru(&mut self) {
        if let Some(key) = self
            .index
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(key, _)| key.clone())
        {
            tracing::debug!("evicting LRU tile: {key}");
            self.index.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (hits, misses) since creation.
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

//! In-memory store of decoded tiles with budgeted, priority-aware eviction.
//!
//! # Indexes
//!
//! Tiles live in a primary map keyed by [`TileKey`]. A secondary map groups
//! keys by level so that per-level operations touch only that level.
//!
//! # Budgets
//!
//! Two limits are enforced on every insert: an optional tile-count ceiling
//! and a CPU byte budget (`width * height * 4` per loaded tile). A GPU byte
//! figure reported by the consumer is tracked alongside but never enforced.
//!
//! # Eviction Order
//!
//! When an insert would break a limit, victims are taken one at a time,
//! lowest priority first:
//!
//! 1. invisible before visible
//! 2. non-preferred level before preferred level
//! 3. higher (finer) level number before lower
//! 4. least recently accessed first
//!
//! Coarse levels therefore survive longest and stay available as fallback
//! while finer tiles load.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::pyramid::TileRect;

use super::types::{Tile, TileKey};

/// Default CPU budget: 512 MiB
pub const DEFAULT_MAX_CPU_BYTES: u64 = 512 * 1024 * 1024;

/// Default GPU figure: 1 GiB (reported only)
pub const DEFAULT_MAX_GPU_BYTES: u64 = 1024 * 1024 * 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Limits and priorities for a [`TileCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Upper bound on the summed RGBA size of loaded tiles
    pub max_cpu_bytes: u64,
    /// GPU budget reported in statistics; not enforced
    pub max_gpu_bytes: u64,
    /// Tile-count ceiling, `None` for unbounded
    pub max_tiles: Option<usize>,
    /// Levels whose tiles outlive others of equal visibility
    pub preferred_levels: Vec<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cpu_bytes: DEFAULT_MAX_CPU_BYTES,
            max_gpu_bytes: DEFAULT_MAX_GPU_BYTES,
            max_tiles: None,
            preferred_levels: Vec::new(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cpu_bytes == 0 {
            return Err(ConfigError::Invalid(
                "CPU budget must be greater than zero".to_string(),
            ));
        }
        if self.max_tiles == Some(0) {
            return Err(ConfigError::Invalid(
                "tile ceiling must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of cache occupancy and lookup counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub tile_count: usize,
    pub cpu_bytes: u64,
    pub gpu_bytes: u64,
    pub max_cpu_bytes: u64,
    pub max_gpu_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0.0 before any lookup
    pub hit_rate: f64,
    pub per_level: BTreeMap<u32, usize>,
}

// =============================================================================
// TileCache
// =============================================================================

/// Decoded tile store. Single-owner: callers serialize access.
///
/// # Example
///
/// ```
/// use gigatile::pyramid::TileRect;
/// use gigatile::tile::{CacheConfig, Tile, TileCache, TileKey};
///
/// let mut cache = TileCache::new(CacheConfig {
///     max_tiles: Some(2),
///     ..CacheConfig::default()
/// });
///
/// let rect = TileRect::new(0, 0, 2, 2);
/// cache.insert(Tile::with_pixels(TileKey::new(0, 0, 0), rect, vec![0; 16]));
/// assert!(cache.get(&TileKey::new(0, 0, 0)).is_some());
/// assert!(cache.get(&TileKey::new(0, 1, 0)).is_none());
///
/// let stats = cache.stats();
/// assert_eq!((stats.hits, stats.misses), (1, 1));
/// assert_eq!(stats.cpu_bytes, 16);
/// ```
#[derive(Debug)]
pub struct TileCache {
    config: CacheConfig,
    preferred: HashSet<u32>,
    tiles: HashMap<TileKey, Tile>,
    by_level: BTreeMap<u32, HashSet<TileKey>>,
    clock: u64,
    hits: u64,
    misses: u64,
    cpu_bytes: u64,
    gpu_bytes: u64,
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl TileCache {
    pub fn new(config: CacheConfig) -> Self {
        let preferred = config.preferred_levels.iter().copied().collect();
        Self {
            config,
            preferred,
            tiles: HashMap::new(),
            by_level: BTreeMap::new(),
            clock: 0,
            hits: 0,
            misses: 0,
            cpu_bytes: 0,
            gpu_bytes: 0,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn cpu_bytes(&self) -> u64 {
        self.cpu_bytes
    }

    pub fn gpu_bytes(&self) -> u64 {
        self.gpu_bytes
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    // -------------------------------------------------------------------------
    // Insert / lookup / remove
    // -------------------------------------------------------------------------

    /// Stores `tile`, replacing any tile with the same key.
    ///
    /// Evicts before inserting until the tile fits both limits. A single tile
    /// larger than the whole CPU budget is still stored, alone. Returns the
    /// keys evicted to make room.
    pub fn insert(&mut self, mut tile: Tile) -> Vec<TileKey> {
        let key = tile.key();
        self.detach(&key);

        let incoming = tile.byte_size();
        let evicted = self.evict_for(incoming);

        tile.last_access = self.tick();
        self.cpu_bytes += incoming;
        self.gpu_bytes += tile.gpu_bytes;
        self.by_level.entry(key.level).or_default().insert(key);
        self.tiles.insert(key, tile);
        evicted
    }

    /// Looks up a tile, counting a hit or a miss. Hits refresh recency.
    pub fn get(&mut self, key: &TileKey) -> Option<&Tile> {
        match self.tiles.get_mut(key) {
            Some(tile) => {
                self.clock += 1;
                tile.last_access = self.clock;
                self.hits += 1;
                Some(&*tile)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Looks up a tile without touching recency or counters.
    pub fn peek(&self, key: &TileKey) -> Option<&Tile> {
        self.tiles.get(key)
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key)
    }

    /// Takes a tile out of the cache.
    pub fn remove(&mut self, key: &TileKey) -> Option<Tile> {
        self.detach(key)
    }

    /// Drops a tile's payload but keeps its entry, releasing its CPU bytes.
    pub fn unload(&mut self, key: &TileKey) -> Option<Vec<u8>> {
        let tile = self.tiles.get_mut(key)?;
        let released = tile.byte_size();
        let pixels = tile.unload()?;
        self.cpu_bytes -= released;
        Some(pixels)
    }

    /// Drops every tile. Lookup counters are kept.
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.by_level.clear();
        self.cpu_bytes = 0;
        self.gpu_bytes = 0;
    }

    fn detach(&mut self, key: &TileKey) -> Option<Tile> {
        let tile = self.tiles.remove(key)?;
        if let Some(keys) = self.by_level.get_mut(&key.level) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_level.remove(&key.level);
            }
        }
        self.cpu_bytes -= tile.byte_size();
        self.gpu_bytes -= tile.gpu_bytes;
        Some(tile)
    }

    // -------------------------------------------------------------------------
    // Eviction
    // -------------------------------------------------------------------------

    fn over_limits(&self, incoming: u64) -> bool {
        let count_full = self
            .config
            .max_tiles
            .is_some_and(|max| self.tiles.len() >= max);
        count_full || self.cpu_bytes + incoming > self.config.max_cpu_bytes
    }

    fn eviction_rank(&self, tile: &Tile) -> (bool, bool, Reverse<u32>, u64) {
        (
            tile.visible,
            self.preferred.contains(&tile.key().level),
            Reverse(tile.key().level),
            tile.last_access,
        )
    }

    /// Evicts lowest-priority tiles until `incoming` bytes and one more tile fit.
    fn evict_for(&mut self, incoming: u64) -> Vec<TileKey> {
        if !self.over_limits(incoming) {
            return Vec::new();
        }

        let mut ranked: Vec<_> = self
            .tiles
            .values()
            .map(|tile| (self.eviction_rank(tile), tile.key()))
            .collect();
        ranked.sort_unstable();

        let mut evicted = Vec::new();
        for (_, key) in ranked {
            if !self.over_limits(incoming) {
                break;
            }
            self.detach(&key);
            evicted.push(key);
        }

        debug!(
            evicted = evicted.len(),
            remaining = self.tiles.len(),
            cpu_bytes = self.cpu_bytes,
            "evicted tiles"
        );
        evicted
    }

    /// Removes every tile not marked visible. Returns how many were removed.
    pub fn evict_invisible(&mut self) -> usize {
        let keys: Vec<TileKey> = self
            .tiles
            .values()
            .filter(|tile| !tile.visible)
            .map(|tile| tile.key())
            .collect();
        for key in &keys {
            self.detach(key);
        }
        keys.len()
    }

    /// Removes every tile of `level`. Returns how many were removed.
    pub fn evict_level(&mut self, level: u32) -> usize {
        let Some(keys) = self.by_level.remove(&level) else {
            return 0;
        };
        for key in &keys {
            if let Some(tile) = self.tiles.remove(key) {
                self.cpu_bytes -= tile.byte_size();
                self.gpu_bytes -= tile.gpu_bytes;
            }
        }
        keys.len()
    }

    // -------------------------------------------------------------------------
    // Visibility and priorities
    // -------------------------------------------------------------------------

    pub fn mark_level_invisible(&mut self, level: u32) {
        if let Some(keys) = self.by_level.get(&level) {
            for key in keys {
                if let Some(tile) = self.tiles.get_mut(key) {
                    tile.visible = false;
                }
            }
        }
    }

    pub fn mark_all_invisible(&mut self) {
        for tile in self.tiles.values_mut() {
            tile.visible = false;
        }
    }

    /// Returns false when the key is not cached.
    pub fn set_visible(&mut self, key: &TileKey, visible: bool) -> bool {
        match self.tiles.get_mut(key) {
            Some(tile) => {
                tile.visible = visible;
                true
            }
            None => false,
        }
    }

    /// Records the GPU footprint the consumer reports for a tile.
    pub fn set_gpu_bytes(&mut self, key: &TileKey, bytes: u64) -> bool {
        match self.tiles.get_mut(key) {
            Some(tile) => {
                self.gpu_bytes = self.gpu_bytes - tile.gpu_bytes + bytes;
                tile.gpu_bytes = bytes;
                true
            }
            None => false,
        }
    }

    pub fn set_preferred_levels(&mut self, levels: impl IntoIterator<Item = u32>) {
        self.preferred = levels.into_iter().collect();
        let mut sorted: Vec<u32> = self.preferred.iter().copied().collect();
        sorted.sort_unstable();
        self.config.preferred_levels = sorted;
    }

    pub fn is_gpu_over_budget(&self) -> bool {
        self.gpu_bytes > self.config.max_gpu_bytes
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Tiles of `level`, ordered by key.
    pub fn tiles_at_level(&self, level: u32) -> Vec<&Tile> {
        let mut tiles: Vec<&Tile> = self
            .by_level
            .get(&level)
            .into_iter()
            .flatten()
            .filter_map(|key| self.tiles.get(key))
            .collect();
        tiles.sort_by_key(|tile| tile.key());
        tiles
    }

    /// Tiles of `level` whose rectangle strictly overlaps `region`.
    pub fn tiles_in_region(&self, level: u32, region: &TileRect) -> Vec<&Tile> {
        self.tiles_at_level(level)
            .into_iter()
            .filter(|tile| tile.rect().intersects(region))
            .collect()
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tile_count: self.tiles.len(),
            cpu_bytes: self.cpu_bytes,
            gpu_bytes: self.gpu_bytes,
            max_cpu_bytes: self.config.max_cpu_bytes,
            max_gpu_bytes: self.config.max_gpu_bytes,
            hits: self.hits,
            misses: self.misses,
            hit_rate: self.hit_rate(),
            per_level: self
                .by_level
                .iter()
                .map(|(level, keys)| (*level, keys.len()))
                .collect(),
        }
    }

    /// Zeroes the hit and miss counters.
    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.misses = 0;
    }
}

// =============================================================================
// Tests
// =============================================================================

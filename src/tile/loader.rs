//! Cache-then-source tile loading.

use tracing::debug;

use crate::error::SourceError;
use crate::pyramid::TileRect;
use crate::source::{LevelInfo, TileSource};

use super::cache::{CacheConfig, TileCache};
use super::types::{Tile, TileKey};

/// Pairs one [`TileSource`] with the [`TileCache`] that fronts it.
///
/// The cache is single-threaded, so the loader takes `&mut self`; hosts that
/// share it across tasks wrap it in a mutex.
pub struct TileLoader {
    source: Box<dyn TileSource>,
    cache: TileCache,
}

impl TileLoader {
    pub fn new(source: Box<dyn TileSource>, config: CacheConfig) -> Self {
        Self {
            source,
            cache: TileCache::new(config),
        }
    }

    pub fn source(&self) -> &dyn TileSource {
        self.source.as_ref()
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TileCache {
        &mut self.cache
    }

    /// Returns the tile at `(level, x, y)`, asking the source on a cache miss.
    ///
    /// `Ok(None)` when the source has no tile for that coordinate.
    pub async fn load(&mut self, level: u32, x: u32, y: u32) -> Result<Option<&Tile>, SourceError> {
        let key = TileKey::new(level, x, y);
        if self.cache.get(&key).is_some() {
            return Ok(self.cache.peek(&key));
        }

        let Some(tile) = self.source.get_tile(level, x, y).await? else {
            return Ok(None);
        };
        let evicted = self.cache.insert(tile);
        if !evicted.is_empty() {
            debug!(tile = %key, evicted = evicted.len(), "inserted with eviction");
        }
        Ok(self.cache.peek(&key))
    }

    /// Loads every tile overlapping `region` (level-local pixels) and makes
    /// exactly those tiles visible.
    ///
    /// Returns the keys still cached once the region is loaded, in row-major
    /// order. A region larger than the cache ceiling evicts its own earlier
    /// tiles; those are left out.
    pub async fn load_region(
        &mut self,
        level: u32,
        region: &TileRect,
    ) -> Result<Vec<TileKey>, SourceError> {
        let Some(info) = self.source.level_info(level) else {
            return Ok(Vec::new());
        };

        self.cache.mark_all_invisible();
        let mut loaded = Vec::new();
        for (x, y) in overlapping_tiles(&info, region) {
            if self.load(level, x, y).await?.is_some() {
                let key = TileKey::new(level, x, y);
                self.cache.set_visible(&key, true);
                loaded.push(key);
            }
        }

        let requested = loaded.len();
        loaded.retain(|key| self.cache.contains(key));
        if loaded.len() < requested {
            debug!(
                level,
                requested,
                kept = loaded.len(),
                "region exceeds cache ceiling"
            );
        }
        Ok(loaded)
    }

    /// Loads every tile of `level`. Returns how many the source produced.
    pub async fn warm_level(&mut self, level: u32) -> Result<usize, SourceError> {
        let Some(info) = self.source.level_info(level) else {
            return Ok(0);
        };

        let mut count = 0;
        for y in 0..info.tiles_y {
            for x in 0..info.tiles_x {
                if self.load(level, x, y).await?.is_some() {
                    count += 1;
                }
            }
        }
        debug!(level, count, cached = self.cache.len(), "warmed level");
        Ok(count)
    }

    /// Drops cached tiles and releases the source.
    pub async fn close(mut self) {
        self.cache.clear();
        self.source.destroy().await;
    }
}

/// Grid coordinates at one level whose tiles overlap `region`.
fn overlapping_tiles(info: &LevelInfo, region: &TileRect) -> Vec<(u32, u32)> {
    if region.is_empty() || info.tile_width == 0 || info.tile_height == 0 {
        return Vec::new();
    }
    if info.tiles_x == 0 || info.tiles_y == 0 {
        return Vec::new();
    }
    if region.x >= info.width || region.y >= info.height {
        return Vec::new();
    }

    let tw = info.tile_width as u64;
    let th = info.tile_height as u64;
    let first_x = (region.x as u64 / tw) as u32;
    let first_y = (region.y as u64 / th) as u32;
    let last_x = ((region.right() - 1) / tw).min(info.tiles_x as u64 - 1) as u32;
    let last_y = ((region.bottom() - 1) / th).min(info.tiles_y as u64 - 1) as u32;

    (first_y..=last_y)
        .flat_map(|y| (first_x..=last_x).map(move |x| (x, y)))
        .collect()
}

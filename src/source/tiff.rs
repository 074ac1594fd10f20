//! Tiled TIFF / BigTIFF source.
//!
//! ```text
//! get_tile(level, x, y)
//!     │  level → IFD (IFD 0 is full resolution, pyramid level 0 is coarsest)
//!     ▼
//! decoded LRU ──hit──► Tile
//!     │ miss
//!     ▼
//! TileTable (loaded once per level) ─► (offset, length)
//!     │  hole → None
//!     ▼
//! range read ─► decode_payload ─► decoded LRU ─► Tile
//! ```
//!
//! Directory walking goes through a [`BlockCache`]; tile payloads are read
//! from the underlying reader directly so they do not churn the block cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use crate::error::{SourceError, TiffError};
use crate::format::tiff::{TiffLevel, TiffPyramid, TileTable};
use crate::format::{decode_payload, DecodedTile};
use crate::io::{BlockCache, RangeReader};
use crate::tile::{Tile, TileKey};

use super::{LevelInfo, TileSource};

/// Decoded tiles kept per source by default
pub const DEFAULT_DECODED_CAPACITY: usize = 64;

/// Tile source over a tiled TIFF or BigTIFF container.
pub struct TiffTileSource<R: RangeReader + 'static> {
    reader: BlockCache<R>,
    pyramid: TiffPyramid,
    /// One lazily loaded table per TIFF level
    tables: Vec<OnceCell<Arc<TileTable>>>,
    decoded: Option<Mutex<LruCache<TileKey, DecodedTile>>>,
}

impl<R: RangeReader + 'static> TiffTileSource<R> {
    /// Parses the container's directories.
    pub async fn open(reader: R) -> Result<Self, SourceError> {
        Self::with_decoded_capacity(reader, DEFAULT_DECODED_CAPACITY).await
    }

    /// Like [`open`](Self::open); a capacity of 0 disables the decoded-tile cache.
    pub async fn with_decoded_capacity(reader: R, capacity: usize) -> Result<Self, SourceError> {
        let reader = BlockCache::new(reader);
        let pyramid = TiffPyramid::parse(&reader).await?;
        let tables = pyramid.levels.iter().map(|_| OnceCell::new()).collect();

        debug!(
            source = reader.identifier(),
            levels = pyramid.level_count(),
            dimensions = ?pyramid.dimensions(),
            "opened TIFF source"
        );

        Ok(Self {
            reader,
            pyramid,
            tables,
            decoded: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        })
    }

    pub fn pyramid(&self) -> &TiffPyramid {
        &self.pyramid
    }

    /// TIFF level index (0 = full resolution) for a pyramid level (0 = coarsest).
    fn tiff_index(&self, level: u32) -> Option<usize> {
        let count = self.pyramid.level_count();
        let level = level as usize;
        (level < count).then(|| count - 1 - level)
    }

    fn tiff_level(&self, level: u32) -> Option<(usize, &TiffLevel)> {
        let index = self.tiff_index(level)?;
        Some((index, self.pyramid.get_level(index)?))
    }

    async fn table(&self, index: usize) -> Result<Arc<TileTable>, TiffError> {
        let cell = self.tables.get(index).ok_or(TiffError::NoTiledLevels)?;
        let level = self.pyramid.get_level(index).ok_or(TiffError::NoTiledLevels)?;
        cell.get_or_try_init(|| async {
            TileTable::load(&self.reader, &self.pyramid.header, level)
                .await
                .map(Arc::new)
        })
        .await
        .cloned()
    }

    async fn cached(&self, key: &TileKey) -> Option<DecodedTile> {
        let decoded = self.decoded.as_ref()?;
        decoded.lock().await.get(key).cloned()
    }

    async fn remember(&self, key: TileKey, tile: &DecodedTile) {
        if let Some(decoded) = &self.decoded {
            decoded.lock().await.put(key, tile.clone());
        }
    }

    /// Reads and decodes one tile; coordinate-scoped failures become `None`.
    async fn read_tile(
        &self,
        key: TileKey,
        index: usize,
        level: &TiffLevel,
    ) -> Result<Option<DecodedTile>, SourceError> {
        let Some((width, height)) = level.tile_dimensions(key.x, key.y) else {
            return Ok(None);
        };
        let Some(tile_index) = level.tile_index(key.x, key.y) else {
            return Ok(None);
        };

        let table = self.table(index).await?;
        let Some(location) = table.location(tile_index) else {
            return Ok(None);
        };
        if location.is_hole() {
            return Ok(None);
        }

        let payload = match self
            .reader
            .inner()
            .read_exact_at(location.offset, location.length as usize)
            .await
        {
            Ok(payload) => payload,
            Err(e) => {
                warn!(tile = %key, error = %e, "tile fetch failed");
                return Ok(None);
            }
        };

        match decode_payload(&payload, &level.layout, width, height) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                warn!(tile = %key, error = %e, "tile decode failed");
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<R: RangeReader + 'static> TileSource for TiffTileSource<R> {
    fn format_id(&self) -> &'static str {
        "tiff"
    }

    fn image_size(&self) -> Result<(u32, u32), SourceError> {
        Ok(self.pyramid.dimensions().ok_or(TiffError::NoTiledLevels)?)
    }

    fn level_count(&self) -> Result<u32, SourceError> {
        Ok(self.pyramid.level_count() as u32)
    }

    fn tile_size(&self) -> Result<u32, SourceError> {
        let base = self.pyramid.base_level().ok_or(TiffError::NoTiledLevels)?;
        Ok(base.tile_width())
    }

    fn level_info(&self, level: u32) -> Option<LevelInfo> {
        let (_, tiff_level) = self.tiff_level(level)?;
        Some(LevelInfo {
            level,
            width: tiff_level.width,
            height: tiff_level.height,
            tile_width: tiff_level.tile_width(),
            tile_height: tiff_level.tile_height(),
            tiles_x: tiff_level.tiles_x,
            tiles_y: tiff_level.tiles_y,
            downsample: tiff_level.downsample,
        })
    }

    async fn get_tile(&self, level: u32, x: u32, y: u32) -> Result<Option<Tile>, SourceError> {
        let Some((index, tiff_level)) = self.tiff_level(level) else {
            return Ok(None);
        };
        if tiff_level.tile_index(x, y).is_none() {
            return Ok(None);
        }

        let key = TileKey::new(level, x, y);
        let image_x = x * tiff_level.tile_width();
        let image_y = y * tiff_level.tile_height();

        if let Some(decoded) = self.cached(&key).await {
            return Ok(Some(Tile::from_decoded(key, image_x, image_y, decoded)));
        }

        let Some(decoded) = self.read_tile(key, index, tiff_level).await? else {
            return Ok(None);
        };
        self.remember(key, &decoded).await;
        Ok(Some(Tile::from_decoded(key, image_x, image_y, decoded)))
    }

    async fn destroy(&self) {
        if let Some(decoded) = &self.decoded {
            decoded.lock().await.clear();
        }
    }
}

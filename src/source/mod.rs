//! Tile sources.
//!
//! A [`TileSource`] produces decoded tiles for one image pyramid. The cache
//! never talks to containers directly; it asks a source on a miss.
//!
//! | source                 | tiles come from                               |
//! |------------------------|-----------------------------------------------|
//! | [`TiffTileSource`]     | tiled TIFF/BigTIFF through a `RangeReader`    |
//! | [`DziTileSource`]      | Deep Zoom tile URLs, one HTTP fetch per tile  |
//! | [`TemplateTileSource`] | an explicit `{level}/{x}/{y}` URL template    |
//! | [`ImageTileSource`]    | one in-memory image, downsampled on demand    |
//!
//! # Failure Scoping
//!
//! `get_tile` returns `Ok(None)` for anything that affects one coordinate
//! only: out-of-range requests, holes in sparse files, failed fetches and
//! undecodable payloads. `Err` is reserved for failures of the whole source.

mod dzi;
mod memory;
mod template;
mod tiff;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SourceError;
use crate::pyramid::PyramidGeometry;
use crate::tile::Tile;

pub use self::dzi::{DziDescriptor, DziTileSource};
pub use self::memory::{ImageTileSource, DEFAULT_IMAGE_TILE_SIZE};
pub use self::template::{build_headers, expand_template, TemplateTileSource};
pub use self::tiff::{TiffTileSource, DEFAULT_DECODED_CAPACITY};

// =============================================================================
// Level Information
// =============================================================================

/// Dimensions and tiling of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelInfo {
    /// Level number, 0 = coarsest
    pub level: u32,
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    /// Native size divided by this level's size
    pub downsample: f64,
}

impl LevelInfo {
    /// Level description derived from halving geometry.
    pub fn from_geometry(geometry: &PyramidGeometry, level: u32) -> Option<Self> {
        let (width, height) = geometry.level_dimensions(level)?;
        let (tiles_x, tiles_y) = geometry.tile_grid(level)?;
        let scale = geometry.scale_factor(level)?;
        Some(Self {
            level,
            width,
            height,
            tile_width: geometry.tile_size,
            tile_height: geometry.tile_size,
            tiles_x,
            tiles_y,
            downsample: 1.0 / scale,
        })
    }
}

// =============================================================================
// TileSource Trait
// =============================================================================

/// Capability contract for anything that can produce tiles.
///
/// Implementations are shared across tasks, so metadata is resolved when
/// the source is opened and the accessors below are synchronous.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Registry id of the format that produced this source.
    fn format_id(&self) -> &'static str;

    /// Native (full-resolution) size in pixels.
    fn image_size(&self) -> Result<(u32, u32), SourceError>;

    fn level_count(&self) -> Result<u32, SourceError>;

    /// Nominal tile edge length in pixels.
    fn tile_size(&self) -> Result<u32, SourceError>;

    /// Geometry implied by the accessors above.
    fn geometry(&self) -> Result<PyramidGeometry, SourceError> {
        let (width, height) = self.image_size()?;
        Ok(PyramidGeometry::new(
            width,
            height,
            self.tile_size()?,
            self.level_count()?,
        ))
    }

    /// Description of `level`, `None` when it does not exist.
    ///
    /// Sources whose stored levels do not follow exact halving override this.
    fn level_info(&self, level: u32) -> Option<LevelInfo> {
        let geometry = self.geometry().ok()?;
        LevelInfo::from_geometry(&geometry, level)
    }

    /// Fetches and decodes tile `(x, y)` of `level`.
    async fn get_tile(&self, level: u32, x: u32, y: u32) -> Result<Option<Tile>, SourceError>;

    /// Releases per-source resources. The default does nothing.
    async fn destroy(&self) {}
}

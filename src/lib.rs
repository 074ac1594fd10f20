//! # gigatile
//!
//! Multi-resolution tile pyramids for gigapixel images.
//!
//! Very large rasters (microscopy slides, maps, scientific mosaics) are never
//! decoded whole. They are addressed as a pyramid of fixed-size tiles, only
//! the tiles a viewport needs are fetched and decoded, and decoded tiles are
//! held in a memory-bounded cache with priority-aware eviction.
//!
//! ## Features
//!
//! - **Pyramid addressing**: pure `(level, x, y)` to pixel-rectangle math
//! - **Tiled TIFF decoding**: TIFF and BigTIFF in either byte order; none,
//!   LZW, Deflate and JPEG compression; 8/16/32-bit samples normalized to RGBA8
//! - **Range-based I/O**: memory buffers, local files and HTTP range requests
//! - **Remote tiles**: Deep Zoom descriptors and URL templates
//! - **Budgeted cache**: CPU byte budget, tile ceiling and eviction that keeps
//!   visible and coarse tiles longest
//!
//! ## Architecture
//!
//! - [`pyramid`] - level and tile geometry
//! - [`io`] - range readers and block caching
//! - [`mod@format`] - TIFF parsing and the tile decoder
//! - [`source`] - the [`TileSource`] contract and its implementations
//! - [`tile`] - decoded tiles, [`TileCache`] and [`TileLoader`]
//! - [`registry`] - format detection and the [`FormatRegistry`]
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use gigatile::{CacheConfig, FormatRegistry, SourceInput, TileLoader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = FormatRegistry::with_builtin_formats();
//!     let source = registry
//!         .open(&SourceInput::parse("slide.tif"), None)
//!         .await?;
//!
//!     let mut loader = TileLoader::new(source, CacheConfig::default());
//!     if let Some(tile) = loader.load(0, 0, 0).await? {
//!         println!("{}x{} tile at {}", tile.width(), tile.height(), tile.key());
//!     }
//!     println!("{:?}", loader.cache().stats());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod pyramid;
pub mod registry;
pub mod source;
pub mod tile;

// Re-export commonly used types
pub use error::{ConfigError, DecodeError, IoError, RegistryError, SourceError, TiffError};
pub use format::{decode_tile, DecodedTile, TileLayout, TileLocation};
pub use io::{BlockCache, FileRangeReader, HttpRangeReader, MemoryRangeReader, RangeReader};
pub use pyramid::{PyramidGeometry, TileRect};
pub use registry::{FormatParser, FormatRegistry, SourceInput, SourceProbe};
pub use source::{
    DziTileSource, ImageTileSource, LevelInfo, TemplateTileSource, TiffTileSource, TileSource,
};
pub use tile::{CacheConfig, CacheStats, Tile, TileCache, TileKey, TileLoader};

//! Decoded tiles and the cache that holds them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                Consumer                 │
//! │   (viewport: region + visible tiles)    │
//! └────────────────────┬────────────────────┘
//!                      │ load / load_region
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │               TileLoader                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │   TileSource    │  │
//! │  │  (decoded    │◄─│   (on a miss)   │  │
//! │  │   RGBA)      │  │                 │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Tile`] / [`TileKey`]: one decoded tile and its `(level, x, y)` identity
//! - [`TileCache`]: budgeted store with priority eviction
//! - [`TileLoader`]: asks the cache first and the source on a miss
//!
//! # Example
//!
//! ```
//! use gigatile::pyramid::TileRect;
//! use gigatile::tile::{CacheConfig, Tile, TileCache, TileKey};
//!
//! let mut cache = TileCache::new(CacheConfig {
//!     max_tiles: Some(2),
//!     ..CacheConfig::default()
//! });
//!
//! let rect = TileRect::new(0, 0, 4, 4);
//! cache.insert(Tile::with_pixels(TileKey::new(0, 0, 0), rect, vec![0; 64]));
//! assert!(cache.get(&TileKey::new(0, 0, 0)).is_some());
//! assert_eq!(cache.stats().hits, 1);
//! ```

mod cache;
mod loader;
mod types;

pub use cache::{CacheConfig, CacheStats, TileCache, DEFAULT_MAX_CPU_BYTES, DEFAULT_MAX_GPU_BYTES};
pub use loader::TileLoader;
pub use types::{Tile, TileKey};

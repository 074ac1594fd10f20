use std::fmt;

use image::RgbaImage;
use serde::Serialize;

use crate::format::DecodedTile;
use crate::pyramid::TileRect;

// =============================================================================
// TileKey
// =============================================================================

/// Identity of a tile within one pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileKey {
    pub level: u32,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    pub const fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.level, self.x, self.y)
    }
}

// =============================================================================
// Tile
// =============================================================================

/// A decoded tile and the state the cache tracks for it.
///
/// The RGBA payload is owned by the tile. Dropping the tile (on eviction,
/// removal or clear) releases it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    key: TileKey,
    width: u32,
    height: u32,
    image_x: u32,
    image_y: u32,
    pixels: Option<Vec<u8>>,
    /// Set by the consumer for tiles currently on screen
    pub visible: bool,
    pub(crate) last_access: u64,
    pub(crate) gpu_bytes: u64,
}

impl Tile {
    /// A tile whose payload has not been loaded.
    pub fn new(key: TileKey, rect: TileRect) -> Self {
        Self {
            key,
            width: rect.width,
            height: rect.height,
            image_x: rect.x,
            image_y: rect.y,
            pixels: None,
            visible: false,
            last_access: 0,
            gpu_bytes: 0,
        }
    }

    /// A loaded tile. `pixels` must hold `width * height * 4` bytes.
    pub fn with_pixels(key: TileKey, rect: TileRect, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), rect.area() as usize * 4);
        Self {
            pixels: Some(pixels),
            ..Self::new(key, rect)
        }
    }

    /// Wraps a decoded tile positioned at `(image_x, image_y)`.
    pub fn from_decoded(key: TileKey, image_x: u32, image_y: u32, decoded: DecodedTile) -> Self {
        let rect = TileRect::new(image_x, image_y, decoded.width, decoded.height);
        Self::with_pixels(key, rect, decoded.pixels)
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Visible width; smaller than the tile size only at the right edge.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Visible height; smaller than the tile size only at the bottom edge.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Left edge in the level's own pixel space.
    pub fn image_x(&self) -> u32 {
        self.image_x
    }

    /// Top edge in the level's own pixel space.
    pub fn image_y(&self) -> u32 {
        self.image_y
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.pixels.is_some()
    }

    pub fn pixels(&self) -> Option<&[u8]> {
        self.pixels.as_deref()
    }

    /// Drops the payload, leaving an unloaded tile. Cached tiles are
    /// unloaded through [`TileCache::unload`](super::TileCache::unload) so
    /// the byte counters follow.
    pub(crate) fn unload(&mut self) -> Option<Vec<u8>> {
        self.pixels.take()
    }

    /// CPU footprint: `width * height * 4` when loaded, otherwise 0.
    pub fn byte_size(&self) -> u64 {
        if self.is_loaded() {
            self.width as u64 * self.height as u64 * 4
        } else {
            0
        }
    }

    /// Logical time of the last insert or cache hit.
    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    pub fn gpu_bytes(&self) -> u64 {
        self.gpu_bytes
    }

    pub fn rect(&self) -> TileRect {
        TileRect::new(self.image_x, self.image_y, self.width, self.height)
    }

    /// Copies the payload into an image buffer.
    pub fn to_image(&self) -> Option<RgbaImage> {
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone()?)
    }
}

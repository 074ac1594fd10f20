use serde::Serialize;

// =============================================================================
// TileRect
// =============================================================================

/// Axis-aligned pixel rectangle in one level's own pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    #[inline]
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Strict overlap test: rectangles that only share an edge do not intersect.
    pub fn intersects(&self, other: &TileRect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        (self.x as u64) < other.right()
            && (other.x as u64) < self.right()
            && (self.y as u64) < other.bottom()
            && (other.y as u64) < self.bottom()
    }
}

// =============================================================================
// Level Math
// =============================================================================

/// Number of halvings between `level` and the native level.
///
/// Levels at or above the native level have no halving.
#[inline]
fn halvings(level: u32, level_count: u32) -> u32 {
    level_count.saturating_sub(1).saturating_sub(level)
}

/// Factor that maps native dimensions to `level` dimensions.
///
/// `1.0` at `level_count - 1`, `0.5` one level below, and so on.
pub fn scale_factor(level: u32, level_count: u32) -> f64 {
    let shift = halvings(level, level_count);
    0.5_f64.powi(shift as i32)
}

/// Pixel dimensions of `level`: `ceil(native / 2^(level_count - 1 - level))`.
///
/// Never returns a zero dimension for a non-empty image.
pub fn level_dimensions(level: u32, level_count: u32, native_width: u32, native_height: u32) -> (u32, u32) {
    let shift = halvings(level, level_count);
    if shift >= 32 {
        return (native_width.min(1), native_height.min(1));
    }
    let divisor = 1u32 << shift;
    let w = native_width.div_ceil(divisor);
    let h = native_height.div_ceil(divisor);
    (w.max(native_width.min(1)), h.max(native_height.min(1)))
}

/// Tile grid `(tiles_x, tiles_y)` covering a level of the given size.
pub fn tile_grid(level_width: u32, level_height: u32, tile_size: u32) -> (u32, u32) {
    if tile_size == 0 {
        return (0, 0);
    }
    (level_width.div_ceil(tile_size), level_height.div_ceil(tile_size))
}

/// Rectangle of tile `(x, y)` in a level of the given size.
///
/// The last column and row are clamped to the level edge. Returns `None`
/// when the coordinate lies outside the tile grid.
pub fn tile_rect(x: u32, y: u32, tile_size: u32, level_width: u32, level_height: u32) -> Option<TileRect> {
    let (tiles_x, tiles_y) = tile_grid(level_width, level_height, tile_size);
    if x >= tiles_x || y >= tiles_y {
        return None;
    }

    let origin_x = x * tile_size;
    let origin_y = y * tile_size;
    let width = tile_size.min(level_width - origin_x);
    let height = tile_size.min(level_height - origin_y);

    Some(TileRect::new(origin_x, origin_y, width, height))
}

/// Row-major index of tile `(x, y)` in a container's tile tables.
#[inline]
pub fn tile_index(x: u32, y: u32, tiles_x: u32) -> u64 {
    y as u64 * tiles_x as u64 + x as u64
}

/// Maps a level-local rectangle into native image space.
///
/// The result is not clamped to the image; callers that need that use
/// [`PyramidGeometry::native_rect`].
pub fn to_native_rect(rect: TileRect, level: u32, level_count: u32) -> TileRect {
    let shift = halvings(level, level_count).min(31);
    let factor = 1u32 << shift;
    TileRect::new(
        rect.x.saturating_mul(factor),
        rect.y.saturating_mul(factor),
        rect.width.saturating_mul(factor),
        rect.height.saturating_mul(factor),
    )
}

/// Smallest level count whose coarsest level fits in a single tile.
pub fn level_count_for(native_width: u32, native_height: u32, tile_size: u32) -> u32 {
    let tile_size = tile_size.max(1);
    let mut dim = native_width.max(native_height);
    let mut count = 1;
    while dim > tile_size {
        dim = dim.div_ceil(2);
        count += 1;
    }
    count
}

// =============================================================================
// PyramidGeometry
// =============================================================================

/// Geometry of one image pyramid: native size, tile size and level count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PyramidGeometry {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub level_count: u32,
}

impl PyramidGeometry {
    pub fn new(width: u32, height: u32, tile_size: u32, level_count: u32) -> Self {
        Self {
            width,
            height,
            tile_size,
            level_count,
        }
    }

    /// Geometry whose coarsest level fits in one tile.
    pub fn for_image(width: u32, height: u32, tile_size: u32) -> Self {
        Self::new(width, height, tile_size, level_count_for(width, height, tile_size))
    }

    #[inline]
    pub fn has_level(&self, level: u32) -> bool {
        level < self.level_count
    }

    /// Index of the native-resolution level.
    #[inline]
    pub fn native_level(&self) -> u32 {
        self.level_count.saturating_sub(1)
    }

    pub fn scale_factor(&self, level: u32) -> Option<f64> {
        self.has_level(level)
            .then(|| scale_factor(level, self.level_count))
    }

    pub fn level_dimensions(&self, level: u32) -> Option<(u32, u32)> {
        self.has_level(level)
            .then(|| level_dimensions(level, self.level_count, self.width, self.height))
    }

    pub fn tile_grid(&self, level: u32) -> Option<(u32, u32)> {
        let (w, h) = self.level_dimensions(level)?;
        Some(tile_grid(w, h, self.tile_size))
    }

    /// Rectangle of tile `(x, y)` at `level`, or `None` for a miss.
    pub fn tile_rect(&self, level: u32, x: u32, y: u32) -> Option<TileRect> {
        let (w, h) = self.level_dimensions(level)?;
        tile_rect(x, y, self.tile_size, w, h)
    }

    /// Tile rectangle mapped into native space and clamped to the image.
    pub fn native_rect(&self, level: u32, x: u32, y: u32) -> Option<TileRect> {
        let rect = to_native_rect(self.tile_rect(level, x, y)?, level, self.level_count);
        let right = rect.right().min(self.width as u64) as u32;
        let bottom = rect.bottom().min(self.height as u64) as u32;
        Some(TileRect::new(
            rect.x,
            rect.y,
            right.saturating_sub(rect.x),
            bottom.saturating_sub(rect.y),
        ))
    }

    /// Coarsest level whose scale factor is at least `scale`.
    ///
    /// Falls back to the native level when no level is fine enough.
    pub fn level_for_scale(&self, scale: f64) -> u32 {
        (0..self.level_count)
            .find(|&level| scale_factor(level, self.level_count) >= scale)
            .unwrap_or_else(|| self.native_level())
    }

    /// Coordinates of every tile at `level` whose rectangle overlaps `region`.
    pub fn tiles_overlapping(&self, level: u32, region: &TileRect) -> Vec<(u32, u32)> {
        let Some((tiles_x, tiles_y)) = self.tile_grid(level) else {
            return Vec::new();
        };
        if region.is_empty() || self.tile_size == 0 {
            return Vec::new();
        }

        let ts = self.tile_size as u64;
        let first_x = region.x as u64 / ts;
        let first_y = region.y as u64 / ts;
        let last_x = ((region.right() - 1) / ts).min(tiles_x as u64 - 1);
        let last_y = ((region.bottom() - 1) / ts).min(tiles_y as u64 - 1);

        let mut coords = Vec::new();
        for y in first_y..=last_y {
            for x in first_x..=last_x {
                coords.push((x as u32, y as u32));
            }
        }
        coords
    }
}

// =============================================================================
// Tests
// =============================================================================

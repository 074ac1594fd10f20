//! Pyramid addressing.
//!
//! Pure functions relating a tile coordinate `(level, x, y)` to its pixel
//! rectangle. Level 0 is the coarsest level; `level_count - 1` is the native
//! resolution. Each step down halves both dimensions (rounding up).
//!
//! ```text
//!   level 0          level 1                 level 2 (native)
//!  ┌──────┐        ┌──────┬───┐            ┌──────┬──────┬──────┬─┐
//!  │ 0,0  │        │ 0,0  │1,0│            │ 0,0  │ 1,0  │ 2,0  │ │
//!  └──────┘        ├──────┼───┤            ├──────┼──────┼──────┼─┤
//!                  │ 0,1  │1,1│            │ 0,1  │ 1,1  │ 2,1  │ │
//!                  └──────┴───┘            └──────┴──────┴──────┴─┘
//! ```
//!
//! Tiles on the last row and column are clamped to the level edge. Coordinates
//! past the grid are misses (`None`), never errors.

mod addressing;

pub use addressing::{
    level_count_for, level_dimensions, scale_factor, tile_grid, tile_index, tile_rect,
    to_native_rect, PyramidGeometry, TileRect,
};

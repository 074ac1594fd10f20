//! In-memory source: one decoded image, tiles served by sub-region copy.
//!
//! The native image is the finest level. Coarser levels are produced by
//! downsampling on first request and kept for the life of the source.

use std::sync::Arc;

use async_trait::async_trait;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::SourceError;
use crate::pyramid::PyramidGeometry;
use crate::tile::{Tile, TileKey};

use super::TileSource;

/// Tile edge used when none is specified
pub const DEFAULT_IMAGE_TILE_SIZE: u32 = 256;

/// Tile source over a single in-memory image.
pub struct ImageTileSource {
    geometry: PyramidGeometry,
    /// Indexed by level; the native level is filled at construction
    levels: Vec<OnceCell<Arc<RgbaImage>>>,
}

impl ImageTileSource {
    pub fn new(image: RgbaImage, tile_size: u32) -> Result<Self, SourceError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(SourceError::Metadata("image has no pixels".to_string()));
        }
        if tile_size == 0 {
            return Err(SourceError::Metadata("tile size must be positive".to_string()));
        }

        let geometry = PyramidGeometry::for_image(width, height, tile_size);
        let native_level = geometry.native_level();
        let mut image = Some(Arc::new(image));
        let levels = (0..geometry.level_count)
            .map(|level| {
                let value = if level == native_level { image.take() } else { None };
                OnceCell::new_with(value)
            })
            .collect();

        Ok(Self { geometry, levels })
    }

    pub fn from_dynamic(image: DynamicImage, tile_size: u32) -> Result<Self, SourceError> {
        Self::new(image.to_rgba8(), tile_size)
    }

    /// Decodes an encoded image (PNG, JPEG) held in memory.
    pub fn from_bytes(bytes: &[u8], tile_size: u32) -> Result<Self, SourceError> {
        let image =
            image::load_from_memory(bytes).map_err(|e| SourceError::Image(e.to_string()))?;
        Self::from_dynamic(image, tile_size)
    }

    fn native(&self) -> Result<Arc<RgbaImage>, SourceError> {
        self.levels
            .last()
            .and_then(|cell| cell.get().cloned())
            .ok_or_else(|| SourceError::Metadata("native level missing".to_string()))
    }

    async fn level_image(&self, level: u32) -> Result<Option<Arc<RgbaImage>>, SourceError> {
        let Some(cell) = self.levels.get(level as usize) else {
            return Ok(None);
        };
        let Some((width, height)) = self.geometry.level_dimensions(level) else {
            return Ok(None);
        };

        let image = cell
            .get_or_try_init(|| async {
                let native = self.native()?;
                debug!(level, width, height, "downsampling level");
                tokio::task::spawn_blocking(move || {
                    Arc::new(imageops::resize(&*native, width, height, FilterType::Triangle))
                })
                .await
                .map_err(|e| SourceError::Image(format!("downsampling failed: {e}")))
            })
            .await?;
        Ok(Some(image.clone()))
    }
}

#[async_trait]
impl TileSource for ImageTileSource {
    fn format_id(&self) -> &'static str {
        "image"
    }

    fn image_size(&self) -> Result<(u32, u32), SourceError> {
        Ok((self.geometry.width, self.geometry.height))
    }

    fn level_count(&self) -> Result<u32, SourceError> {
        Ok(self.geometry.level_count)
    }

    fn tile_size(&self) -> Result<u32, SourceError> {
        Ok(self.geometry.tile_size)
    }

    fn geometry(&self) -> Result<PyramidGeometry, SourceError> {
        Ok(self.geometry)
    }

    async fn get_tile(&self, level: u32, x: u32, y: u32) -> Result<Option<Tile>, SourceError> {
        let Some(rect) = self.geometry.tile_rect(level, x, y) else {
            return Ok(None);
        };
        let Some(image) = self.level_image(level).await? else {
            return Ok(None);
        };

        let pixels = imageops::crop_imm(&*image, rect.x, rect.y, rect.width, rect.height)
            .to_image()
            .into_raw();
        Ok(Some(Tile::with_pixels(TileKey::new(level, x, y), rect, pixels)))
    }
}

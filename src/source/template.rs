//! Remote tiles addressed by a URL template.
//!
//! Placeholders: `{level}` (alias `{z}`), `{x}`, `{y}`. Each tile is one GET;
//! the response is decoded independently with the `image` codecs.

use async_trait::async_trait;
use image::imageops;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use tracing::warn;

use crate::error::{DecodeError, SourceError};
use crate::io::fetch_bytes;
use crate::pyramid::{PyramidGeometry, TileRect};
use crate::tile::{Tile, TileKey};

use super::TileSource;

/// Substitutes tile coordinates into a URL template.
pub fn expand_template(template: &str, level: u32, x: u32, y: u32) -> String {
    template
        .replace("{level}", &level.to_string())
        .replace("{z}", &level.to_string())
        .replace("{x}", &x.to_string())
        .replace("{y}", &y.to_string())
}

/// Builds a header map from name/value pairs.
pub fn build_headers<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<HeaderMap, SourceError> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SourceError::Metadata(format!("invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| SourceError::Metadata(format!("invalid value for header {name}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Decodes a fetched tile image and cuts the visible `rect` out of it.
///
/// `(skip_x, skip_y)` is the overlap margin on the leading edges.
pub(crate) fn crop_remote_tile(
    key: TileKey,
    encoded: &[u8],
    rect: TileRect,
    skip_x: u32,
    skip_y: u32,
) -> Result<Tile, DecodeError> {
    let image = image::load_from_memory(encoded)
        .map_err(|e| DecodeError::Image(e.to_string()))?
        .to_rgba8();

    let (width, height) = image.dimensions();
    if width < skip_x + rect.width || height < skip_y + rect.height {
        return Err(DecodeError::Truncated {
            expected: (skip_x + rect.width) as usize * (skip_y + rect.height) as usize * 4,
            actual: width as usize * height as usize * 4,
        });
    }

    let pixels = if (skip_x, skip_y, width, height) == (0, 0, rect.width, rect.height) {
        image.into_raw()
    } else {
        imageops::crop_imm(&image, skip_x, skip_y, rect.width, rect.height)
            .to_image()
            .into_raw()
    };
    Ok(Tile::with_pixels(key, rect, pixels))
}

/// Fetches one remote tile; failures are logged and reported as absent.
pub(crate) async fn fetch_remote_tile(
    client: &Client,
    headers: &HeaderMap,
    url: &str,
    key: TileKey,
    rect: TileRect,
    overlap: u32,
) -> Option<Tile> {
    let bytes = match fetch_bytes(client, url, headers).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(tile = %key, url, error = %e, "tile fetch failed");
            return None;
        }
    };

    let skip_x = if key.x > 0 { overlap } else { 0 };
    let skip_y = if key.y > 0 { overlap } else { 0 };
    match crop_remote_tile(key, &bytes, rect, skip_x, skip_y) {
        Ok(tile) => Some(tile),
        Err(e) => {
            warn!(tile = %key, url, error = %e, "tile decode failed");
            None
        }
    }
}

// =============================================================================
// TemplateTileSource
// =============================================================================

/// Remote source with an explicit URL template and explicit image metadata.
#[derive(Debug, Clone)]
pub struct TemplateTileSource {
    client: Client,
    template: String,
    geometry: PyramidGeometry,
    overlap: u32,
    headers: HeaderMap,
}

impl TemplateTileSource {
    /// Creates a source; the template must name `{x}`, `{y}` and a level.
    pub fn new(template: impl Into<String>, geometry: PyramidGeometry) -> Result<Self, SourceError> {
        let template = template.into();
        let has_level = template.contains("{level}") || template.contains("{z}");
        if !has_level || !template.contains("{x}") || !template.contains("{y}") {
            return Err(SourceError::Metadata(format!(
                "URL template '{template}' must contain {{level}} or {{z}}, {{x}} and {{y}}"
            )));
        }
        if geometry.width == 0 || geometry.height == 0 || geometry.tile_size == 0 {
            return Err(SourceError::Metadata(format!(
                "invalid geometry {}x{} with tile size {}",
                geometry.width, geometry.height, geometry.tile_size
            )));
        }
        if geometry.level_count == 0 {
            return Err(SourceError::Metadata("level count must be positive".to_string()));
        }

        Ok(Self {
            client: Client::new(),
            template,
            geometry,
            overlap: 0,
            headers: HeaderMap::new(),
        })
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Pixels each tile repeats from its neighbours on every interior edge.
    pub fn with_overlap(mut self, overlap: u32) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn tile_url(&self, level: u32, x: u32, y: u32) -> String {
        expand_template(&self.template, level, x, y)
    }
}

#[async_trait]
impl TileSource for TemplateTileSource {
    fn format_id(&self) -> &'static str {
        "template"
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
        let url = self.tile_url(level, x, y);
        let key = TileKey::new(level, x, y);
        Ok(fetch_remote_tile(&self.client, &self.headers, &url, key, rect, self.overlap).await)
    }
}

//! Formats registered by [`FormatRegistry::with_builtin_formats`].
//!
//! [`FormatRegistry::with_builtin_formats`]: super::FormatRegistry::with_builtin_formats

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::Client;

use crate::error::SourceError;
use crate::format::ContentKind;
use crate::io::{fetch_bytes, FileRangeReader, HttpRangeReader, MemoryRangeReader};
use crate::source::{
    DziTileSource, ImageTileSource, TiffTileSource, TileSource, DEFAULT_IMAGE_TILE_SIZE,
};

use super::{FormatParser, SourceInput, SourceProbe};

const TIFF_EXTENSIONS: &[&str] = &["tif", "tiff", "btf", "tf8", "svs"];

// =============================================================================
// TIFF
// =============================================================================

/// Tiled TIFF and BigTIFF, from any input kind.
#[derive(Debug, Clone, Default)]
pub struct TiffFormat {
    client: Client,
}

impl TiffFormat {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FormatParser for TiffFormat {
    fn id(&self) -> &str {
        "tiff"
    }

    fn can_parse(&self, probe: &SourceProbe) -> bool {
        match probe.kind {
            Some(kind) => kind.is_tiff(),
            None => probe.magic.is_empty() && probe.has_extension(TIFF_EXTENSIONS),
        }
    }

    async fn open(&self, input: &SourceInput) -> Result<Box<dyn TileSource>, SourceError> {
        let source: Box<dyn TileSource> = match input {
            SourceInput::Buffer(bytes) => {
                Box::new(TiffTileSource::open(MemoryRangeReader::new(bytes.clone())).await?)
            }
            SourceInput::File(path) => {
                Box::new(TiffTileSource::open(FileRangeReader::open(path).await?).await?)
            }
            SourceInput::Url(url) => {
                let reader = HttpRangeReader::new(self.client.clone(), url.as_str()).await?;
                Box::new(TiffTileSource::open(reader).await?)
            }
        };
        Ok(source)
    }
}

// =============================================================================
// Deep Zoom
// =============================================================================

/// Deep Zoom descriptors served over HTTP.
#[derive(Debug, Clone, Default)]
pub struct DziFormat {
    client: Client,
    headers: HeaderMap,
}

impl DziFormat {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            headers: HeaderMap::new(),
        }
    }

    /// Headers sent with the descriptor and every tile request.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl FormatParser for DziFormat {
    fn id(&self) -> &str {
        "dzi"
    }

    fn can_parse(&self, probe: &SourceProbe) -> bool {
        probe.kind == Some(ContentKind::DeepZoom) || probe.has_extension(&["dzi"])
    }

    async fn open(&self, input: &SourceInput) -> Result<Box<dyn TileSource>, SourceError> {
        match input {
            SourceInput::Url(url) => Ok(Box::new(
                DziTileSource::open(self.client.clone(), url, self.headers.clone()).await?,
            )),
            other => Err(SourceError::UnsupportedInput(format!(
                "Deep Zoom tiles are located relative to the descriptor URL; got {other}"
            ))),
        }
    }
}

// =============================================================================
// Single image
// =============================================================================

/// A single PNG or JPEG, decoded whole and tiled in memory.
#[derive(Debug, Clone)]
pub struct ImageFormat {
    client: Client,
    tile_size: u32,
}

impl ImageFormat {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            tile_size: DEFAULT_IMAGE_TILE_SIZE,
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }
}

impl Default for ImageFormat {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

#[async_trait]
impl FormatParser for ImageFormat {
    fn id(&self) -> &str {
        "image"
    }

    fn can_parse(&self, probe: &SourceProbe) -> bool {
        probe.kind.is_some_and(|kind| kind.is_raster_image())
    }

    async fn open(&self, input: &SourceInput) -> Result<Box<dyn TileSource>, SourceError> {
        let bytes: Bytes = match input {
            SourceInput::Buffer(bytes) => bytes.clone(),
            SourceInput::File(path) => Bytes::from(
                tokio::fs::read(path)
                    .await
                    .map_err(crate::error::IoError::from)?,
            ),
            SourceInput::Url(url) => fetch_bytes(&self.client, url, &HeaderMap::new()).await?,
        };

        let tile_size = self.tile_size;
        let source = tokio::task::spawn_blocking(move || ImageTileSource::from_bytes(&bytes, tile_size))
            .await
            .map_err(|e| SourceError::Image(format!("image decoding task failed: {e}")))??;
        Ok(Box::new(source))
    }
}

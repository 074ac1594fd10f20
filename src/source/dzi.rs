//! Deep Zoom (DZI) remote source.
//!
//! # Level Numbering
//!
//! Deep Zoom numbers levels from a 1x1 image at level 0 up to full
//! resolution at `ceil(log2(max(width, height)))`, halving with rounding up.
//! That is the same convention as [`crate::pyramid`], so levels map 1:1.
//!
//! # Tile URLs
//!
//! A descriptor at `https://host/slide.dzi` serves tiles from
//! `https://host/slide_files/{level}/{x}_{y}.{format}`. Tiles carry `Overlap`
//! extra pixels on each interior edge, which are cropped away.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use roxmltree::{Document, Node};
use tracing::debug;

use crate::error::SourceError;
use crate::io::fetch_bytes;
use crate::pyramid::PyramidGeometry;
use crate::tile::{Tile, TileKey};

use super::template::fetch_remote_tile;
use super::TileSource;

// =============================================================================
// Descriptor
// =============================================================================

/// Contents of a `.dzi` XML descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DziDescriptor {
    pub tile_size: u32,
    pub overlap: u32,
    /// Tile file extension, e.g. `jpg`
    pub format: String,
    pub width: u32,
    pub height: u32,
}

impl DziDescriptor {
    /// Parses the `<Image>` and `<Size>` attributes of a descriptor.
    ///
    /// The root element must be `Image`, in any namespace. Its first `Size`
    /// child carries the full-resolution dimensions.
    pub fn parse(xml: &str) -> Result<Self, SourceError> {
        let doc = Document::parse(xml)
            .map_err(|e| SourceError::Metadata(format!("invalid descriptor XML: {e}")))?;

        let image = doc.root_element();
        if image.tag_name().name() != "Image" {
            return Err(SourceError::Metadata(format!(
                "descriptor root is <{}>, expected <Image>",
                image.tag_name().name()
            )));
        }
        let size = image
            .children()
            .find(|n| n.is_element() && n.tag_name().name() == "Size")
            .ok_or_else(|| SourceError::Metadata("descriptor has no <Size> element".to_string()))?;

        let tile_size = required_u32(image, "TileSize")?;
        let width = required_u32(size, "Width")?;
        let height = required_u32(size, "Height")?;
        let overlap = match image.attribute("Overlap") {
            Some(value) => parse_u32("Overlap", value)?,
            None => 0,
        };
        let format = image.attribute("Format").unwrap_or("jpg").trim().to_string();

        if tile_size == 0 || width == 0 || height == 0 {
            return Err(SourceError::Metadata(format!(
                "descriptor has zero size: {width}x{height}, tile size {tile_size}"
            )));
        }
        if format.is_empty() {
            return Err(SourceError::Metadata("descriptor has empty Format".to_string()));
        }

        Ok(Self {
            tile_size,
            overlap,
            format,
            width,
            height,
        })
    }

    /// Renders the descriptor as XML.
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008"
       TileSize="{}"
       Overlap="{}"
       Format="{}">
  <Size Width="{}" Height="{}" />
</Image>"#,
            self.tile_size, self.overlap, self.format, self.width, self.height
        )
    }

    /// Highest (full-resolution) level: `ceil(log2(max(width, height)))`.
    pub fn max_level(&self) -> u32 {
        let max_dim = self.width.max(self.height);
        if max_dim <= 1 {
            return 0;
        }
        // Bits needed to represent max_dim - 1 equals ceil(log2(max_dim))
        32 - (max_dim - 1).leading_zeros()
    }

    pub fn geometry(&self) -> PyramidGeometry {
        PyramidGeometry::new(self.width, self.height, self.tile_size, self.max_level() + 1)
    }
}

fn required_u32(node: Node<'_, '_>, name: &'static str) -> Result<u32, SourceError> {
    let value = node.attribute(name).ok_or_else(|| {
        SourceError::Metadata(format!(
            "descriptor <{}> is missing {name}",
            node.tag_name().name()
        ))
    })?;
    parse_u32(name, value)
}

fn parse_u32(name: &str, value: &str) -> Result<u32, SourceError> {
    value
        .trim()
        .parse()
        .map_err(|_| SourceError::Metadata(format!("invalid {name} '{value}'")))
}

/// `https://host/slide.dzi` → `https://host/slide`
fn tile_base(descriptor_url: &str) -> &str {
    descriptor_url
        .strip_suffix(".dzi")
        .or_else(|| descriptor_url.strip_suffix(".xml"))
        .unwrap_or(descriptor_url)
}

// =============================================================================
// DziTileSource
// =============================================================================

/// Remote Deep Zoom pyramid.
#[derive(Debug, Clone)]
pub struct DziTileSource {
    client: Client,
    headers: HeaderMap,
    base: String,
    descriptor: DziDescriptor,
    geometry: PyramidGeometry,
}

impl DziTileSource {
    /// Fetches and parses the descriptor at `url`.
    pub async fn open(client: Client, url: &str, headers: HeaderMap) -> Result<Self, SourceError> {
        let bytes = fetch_bytes(&client, url, &headers).await?;
        let xml = String::from_utf8_lossy(&bytes);
        let descriptor = DziDescriptor::parse(&xml)?;
        debug!(
            url,
            width = descriptor.width,
            height = descriptor.height,
            tile_size = descriptor.tile_size,
            "opened DZI source"
        );
        Ok(Self::from_descriptor(client, url, descriptor).with_headers(headers))
    }

    /// Uses an already-parsed descriptor; `url` locates the tile tree.
    pub fn from_descriptor(client: Client, url: &str, descriptor: DziDescriptor) -> Self {
        let geometry = descriptor.geometry();
        Self {
            client,
            headers: HeaderMap::new(),
            base: tile_base(url).to_string(),
            descriptor,
            geometry,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn descriptor(&self) -> &DziDescriptor {
        &self.descriptor
    }

    pub fn tile_url(&self, level: u32, x: u32, y: u32) -> String {
        format!(
            "{}_files/{}/{}_{}.{}",
            self.base, level, x, y, self.descriptor.format
        )
    }
}

#[async_trait]
impl TileSource for DziTileSource {
    fn format_id(&self) -> &'static str {
        "dzi"
    }

    fn image_size(&self) -> Result<(u32, u32), SourceError> {
        Ok((self.descriptor.width, self.descriptor.height))
    }

    fn level_count(&self) -> Result<u32, SourceError> {
        Ok(self.geometry.level_count)
    }

    fn tile_size(&self) -> Result<u32, SourceError> {
        Ok(self.descriptor.tile_size)
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
        Ok(fetch_remote_tile(
            &self.client,
            &self.headers,
            &url,
            key,
            rect,
            self.descriptor.overlap,
        )
        .await)
    }
}

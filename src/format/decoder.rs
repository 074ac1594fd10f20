//! Tiled binary decoding.
//!
//! A tile is located by an `(offset, length)` pair from the container's index
//! table. Decoding one tile is a pure function of the buffer, that location
//! and the level's [`TileLayout`]:
//!
//! ```text
//! buffer[offset..offset+length]
//!        │
//!        ├── JPEG ───────────► merge JPEGTables ─► codec ─► RGBA ─┐
//!        │                                                        ├─► crop to edge size
//!        └── None/Deflate/LZW/PackBits ─► predictor ─► normalize ─┘
//! ```
//!
//! A location with a zero offset or zero length is a hole in a sparse file
//! and decodes to `None` without touching the buffer.

use bytes::Bytes;
use image::imageops;

use crate::error::DecodeError;

use super::compression::{decompress, undo_horizontal_predictor};
use super::jpeg::decode_jpeg_tile;
use super::normalize::{normalize_to_rgba, SampleLayout};
use super::tiff::{Compression, Predictor};

// =============================================================================
// TileLocation
// =============================================================================

/// Byte range of one compressed tile within its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileLocation {
    pub offset: u64,
    pub length: u64,
}

impl TileLocation {
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// Empty tile in a sparse container.
    #[inline]
    pub const fn is_hole(&self) -> bool {
        self.offset == 0 || self.length == 0
    }

    /// Exclusive end offset, `None` on overflow.
    #[inline]
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }

    /// Ensures the range lies within a buffer of `buffer_len` bytes.
    pub fn check_bounds(&self, buffer_len: usize) -> Result<(), DecodeError> {
        match self.end() {
            Some(end) if end <= buffer_len as u64 => Ok(()),
            _ => Err(DecodeError::Bounds {
                offset: self.offset,
                length: self.length,
                buffer_len: buffer_len as u64,
            }),
        }
    }
}

// =============================================================================
// TileLayout
// =============================================================================

/// Everything about a level that is needed to decode any of its tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLayout {
    /// Raw Compression tag value
    pub compression: u16,
    /// Raw Predictor tag value (1 = none)
    pub predictor: u16,
    pub samples: SampleLayout,
    /// Stored (padded) tile width
    pub tile_width: u32,
    /// Stored (padded) tile height
    pub tile_height: u32,
    /// Shared JPEG tables for abbreviated streams
    pub jpeg_tables: Option<Bytes>,
}

impl TileLayout {
    /// Uncompressed, 8-bit, chunky layout.
    pub fn uncompressed(tile_width: u32, tile_height: u32, samples_per_pixel: u16) -> Self {
        Self {
            compression: Compression::None as u16,
            predictor: 1,
            samples: SampleLayout::u8(samples_per_pixel),
            tile_width,
            tile_height,
            jpeg_tables: None,
        }
    }

    /// Size of one stored tile after decompression.
    pub fn stored_tile_bytes(&self) -> usize {
        self.tile_width as usize * self.tile_height as usize * self.samples.bytes_per_pixel()
    }

    fn is_jpeg(&self) -> bool {
        matches!(
            Compression::from_u16(self.compression),
            Some(Compression::Jpeg | Compression::OldJpeg)
        )
    }
}

// =============================================================================
// DecodedTile
// =============================================================================

/// A tile normalized to tightly packed RGBA8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    pub width: u32,
    pub height: u32,
    /// `width * height * 4` bytes, row-major
    pub pixels: Vec<u8>,
}

impl DecodedTile {
    pub fn byte_size(&self) -> usize {
        self.pixels.len()
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes the tile at `location` within `buffer`.
///
/// `width` and `height` are the visible (edge-clamped) dimensions; the stored
/// tile may be padded beyond them. Returns `Ok(None)` for holes.
pub fn decode_tile(
    buffer: &[u8],
    location: TileLocation,
    layout: &TileLayout,
    width: u32,
    height: u32,
) -> Result<Option<DecodedTile>, DecodeError> {
    if location.is_hole() {
        return Ok(None);
    }
    location.check_bounds(buffer.len())?;

    let start = location.offset as usize;
    let end = start + location.length as usize;
    decode_payload(&buffer[start..end], layout, width, height).map(Some)
}

/// Decodes one tile's compressed bytes.
pub fn decode_payload(
    payload: &[u8],
    layout: &TileLayout,
    width: u32,
    height: u32,
) -> Result<DecodedTile, DecodeError> {
    if width > layout.tile_width || height > layout.tile_height {
        return Err(DecodeError::UnsupportedLayout(format!(
            "visible size {width}x{height} exceeds stored tile {}x{}",
            layout.tile_width, layout.tile_height
        )));
    }

    if layout.is_jpeg() {
        return decode_jpeg_payload(payload, layout, width, height);
    }

    let compression = Compression::from_u16(layout.compression)
        .ok_or(DecodeError::UnsupportedCompression(layout.compression))?;
    layout.samples.validate()?;

    let expected = layout.stored_tile_bytes();
    let mut raw = decompress(payload, compression, expected)?;
    if raw.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: raw.len(),
        });
    }

    match Predictor::from_u16(layout.predictor) {
        Some(Predictor::None) => {}
        Some(Predictor::Horizontal) => undo_horizontal_predictor(
            &mut raw[..expected],
            layout.tile_width as usize,
            layout.samples.samples_per_pixel as usize,
            layout.samples.bytes_per_sample(),
            layout.samples.byte_order,
        )?,
        _ => {
            return Err(DecodeError::UnsupportedLayout(format!(
                "predictor {}",
                layout.predictor
            )))
        }
    }

    let pixels = normalize_to_rgba(&raw, &layout.samples, layout.tile_width, width, height)?;
    Ok(DecodedTile {
        width,
        height,
        pixels,
    })
}

fn decode_jpeg_payload(
    payload: &[u8],
    layout: &TileLayout,
    width: u32,
    height: u32,
) -> Result<DecodedTile, DecodeError> {
    let rgba = decode_jpeg_tile(layout.jpeg_tables.as_deref(), payload)?;
    let (decoded_w, decoded_h) = rgba.dimensions();
    if decoded_w < width || decoded_h < height {
        return Err(DecodeError::Truncated {
            expected: width as usize * height as usize * 4,
            actual: decoded_w as usize * decoded_h as usize * 4,
        });
    }

    let pixels = if (decoded_w, decoded_h) == (width, height) {
        rgba.into_raw()
    } else {
        imageops::crop_imm(&rgba, 0, 0, width, height)
            .to_image()
            .into_raw()
    };

    Ok(DecodedTile {
        width,
        height,
        pixels,
    })
}

// =============================================================================
// Tests
// =============================================================================

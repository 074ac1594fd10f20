//! JPEG-compressed tiles.
//!
//! Tiled TIFFs often store abbreviated JPEG streams: each tile carries only
//! frame and scan data while the quantization (DQT) and Huffman (DHT) tables
//! live once in the `JPEGTables` tag. Before decoding, the shared tables are
//! spliced in:
//!
//! ```text
//! tables: SOI DQT DHT EOI      tile: SOI SOF SOS ... EOI
//!    =>   SOI DQT DHT SOF SOS ... EOI
//! ```

use bytes::{Bytes, BytesMut};
use image::{ImageFormat, RgbaImage};

use crate::error::DecodeError;

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
const DHT: u8 = 0xC4;
const DQT: u8 = 0xDB;
const SOS: u8 = 0xDA;

/// Which table segments appear before the first scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct TablePresence {
    quantization: bool,
    huffman: bool,
}

fn scan_tables(data: &[u8]) -> Option<TablePresence> {
    if data.len() < 4 || data[..2] != SOI {
        return None;
    }

    let mut found = TablePresence::default();
    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match data[pos + 1] {
            SOS => break,
            DQT => found.quantization = true,
            DHT => found.huffman = true,
            // Fill bytes and standalone markers carry no length
            0xFF | 0x00 | 0x01 | 0xD0..=0xD9 => {
                pos += 2;
                continue;
            }
            _ => {}
        }
        if pos + 3 >= data.len() {
            break;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        pos += 2 + len;
    }
    Some(found)
}

/// True when the stream starts with SOI but lacks DQT or DHT before its first scan.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    scan_tables(data)
        .map(|t| !(t.quantization && t.huffman))
        .unwrap_or(false)
}

/// Splices `tables` (SOI ... EOI) in front of the tile's own segments.
pub fn merge_jpeg_tables(tables: &[u8], tile: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(tile);
    }
    if tile.is_empty() {
        return Bytes::new();
    }

    let tables_body = tables.strip_suffix(&EOI).unwrap_or(tables);
    let tile_body = tile.strip_prefix(&SOI).unwrap_or(tile);

    let mut merged = BytesMut::with_capacity(tables_body.len() + tile_body.len());
    merged.extend_from_slice(tables_body);
    merged.extend_from_slice(tile_body);
    merged.freeze()
}

/// Returns a self-contained JPEG stream for the tile.
pub fn prepare_tile_jpeg(tables: Option<&[u8]>, tile: &[u8]) -> Bytes {
    match tables {
        Some(tables) if is_abbreviated_stream(tile) => merge_jpeg_tables(tables, tile),
        _ => Bytes::copy_from_slice(tile),
    }
}

/// Decodes a JPEG tile into RGBA8, merging shared tables when needed.
///
/// YCbCr and grayscale streams are converted by the codec.
pub fn decode_jpeg_tile(tables: Option<&[u8]>, tile: &[u8]) -> Result<RgbaImage, DecodeError> {
    let stream = prepare_tile_jpeg(tables, tile);
    let image = image::load_from_memory_with_format(&stream, ImageFormat::Jpeg)
        .map_err(|e| DecodeError::Image(e.to_string()))?;
    Ok(image.to_rgba8())
}

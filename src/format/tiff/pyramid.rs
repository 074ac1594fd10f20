//! Pyramid level discovery for tiled TIFF and BigTIFF.
//!
//! A pyramidal TIFF stores each resolution as its own IFD. Not every IFD is
//! a pyramid level: files may also carry transparency masks, strip-organized
//! thumbnails or unrelated overview images.
//!
//! # Identification
//!
//! An IFD becomes a level when:
//! 1. It is tiled (TileWidth, TileLength and TileOffsets present)
//! 2. It is not flagged as a mask in NewSubfileType
//! 3. Its sample organization is chunky (or single-channel)
//! 4. After sorting by area, its downsample relative to the largest IFD is
//!    close to a power of two and strictly coarser than the previous level
//!
//! Levels are kept in file order of resolution: index 0 is the full-size
//! image. Callers that number levels coarse-first invert the index.

use std::collections::HashSet;

use tracing::debug;

use crate::error::TiffError;
use crate::format::decoder::{TileLayout, TileLocation};
use crate::format::normalize::{SampleLayout, PHOTOMETRIC_BLACK_IS_ZERO, PHOTOMETRIC_RGB};
use crate::io::RangeReader;

use super::parser::{Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
use super::tags::{SampleFormat, TiffTag};
use super::values::ValueReader;

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of IFDs to follow before giving up on the chain
const MAX_IFDS: usize = 256;

/// Directories claiming more entries than this are treated as corrupt
const MAX_IFD_ENTRIES: u64 = 4096;

const PLANAR_CHUNKY: u64 = 1;

// =============================================================================
// TiffLevel
// =============================================================================

/// One resolution in a tiled TIFF.
#[derive(Debug, Clone)]
pub struct TiffLevel {
    /// Position of the IFD in the file's chain
    pub ifd_index: usize,
    pub width: u32,
    pub height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    /// Downsample relative to the full-size level (1.0 for the base)
    pub downsample: f64,
    /// Decoding parameters shared by every tile of this level
    pub layout: TileLayout,
    tile_offsets: IfdEntry,
    tile_byte_counts: IfdEntry,
}

impl TiffLevel {
    /// Reads the level description from a tiled IFD.
    ///
    /// Returns `Ok(None)` for IFDs that are not image levels (untiled, masks,
    /// planar multi-channel data).
    async fn from_ifd<R: RangeReader>(
        values: &ValueReader<'_, R>,
        ifd: &Ifd,
        ifd_index: usize,
    ) -> Result<Option<Self>, TiffError> {
        let order = values.byte_order();
        if !ifd.is_tiled() || ifd.is_mask(order) {
            return Ok(None);
        }

        let width = ifd.image_width(order).ok_or(TiffError::MissingTag("ImageWidth"))?;
        let height = ifd.image_height(order).ok_or(TiffError::MissingTag("ImageLength"))?;
        let tile_width = ifd.tile_width(order).ok_or(TiffError::MissingTag("TileWidth"))?;
        let tile_height = ifd.tile_height(order).ok_or(TiffError::MissingTag("TileLength"))?;
        if width == 0 || height == 0 || tile_width == 0 || tile_height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "ImageWidth",
                message: format!("zero dimension in {width}x{height} / tile {tile_width}x{tile_height}"),
            });
        }

        let samples_per_pixel = match ifd.get_entry_by_tag(TiffTag::SamplesPerPixel) {
            Some(entry) => values.read_u64(entry).await? as u16,
            None => 1,
        };

        let planar = match ifd.get_entry_by_tag(TiffTag::PlanarConfiguration) {
            Some(entry) => values.read_u64(entry).await?,
            None => PLANAR_CHUNKY,
        };
        if planar != PLANAR_CHUNKY && samples_per_pixel > 1 {
            debug!(ifd_index, "skipping planar-separate IFD");
            return Ok(None);
        }

        let bits_per_sample = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => {
                let bits = values.read_u64_array(entry).await?;
                let first = bits.first().copied().unwrap_or(1);
                if bits.iter().any(|&b| b != first) {
                    return Err(TiffError::InvalidTagValue {
                        tag: "BitsPerSample",
                        message: format!("mixed sample depths {bits:?}"),
                    });
                }
                first as u16
            }
            None => 1,
        };

        let sample_format = match ifd.get_entry_by_tag(TiffTag::SampleFormat) {
            Some(entry) => values
                .read_u64_array(entry)
                .await?
                .first()
                .map(|&v| SampleFormat::from_u16(v as u16))
                .unwrap_or_default(),
            None => SampleFormat::Unsigned,
        };

        let photometric = match ifd.get_entry_by_tag(TiffTag::PhotometricInterpretation) {
            Some(entry) => values.read_u64(entry).await? as u16,
            None if samples_per_pixel >= 3 => PHOTOMETRIC_RGB,
            None => PHOTOMETRIC_BLACK_IS_ZERO,
        };

        let predictor = match ifd.get_entry_by_tag(TiffTag::Predictor) {
            Some(entry) => values.read_u64(entry).await? as u16,
            None => 1,
        };

        let jpeg_tables = match ifd.get_entry_by_tag(TiffTag::JpegTables) {
            Some(entry) => Some(values.read_bytes(entry).await?),
            None => None,
        };

        let tile_offsets = ifd
            .get_entry_by_tag(TiffTag::TileOffsets)
            .cloned()
            .ok_or(TiffError::MissingTag("TileOffsets"))?;
        let tile_byte_counts = ifd
            .get_entry_by_tag(TiffTag::TileByteCounts)
            .cloned()
            .ok_or(TiffError::MissingTag("TileByteCounts"))?;

        let layout = TileLayout {
            compression: ifd.compression(order),
            predictor,
            samples: SampleLayout {
                bits_per_sample,
                samples_per_pixel,
                sample_format,
                byte_order: order,
                photometric,
            },
            tile_width,
            tile_height,
            jpeg_tables,
        };

        Ok(Some(Self {
            ifd_index,
            width,
            height,
            tiles_x: width.div_ceil(tile_width),
            tiles_y: height.div_ceil(tile_height),
            downsample: 1.0,
            layout,
            tile_offsets,
            tile_byte_counts,
        }))
    }

    #[inline]
    pub fn tile_width(&self) -> u32 {
        self.layout.tile_width
    }

    #[inline]
    pub fn tile_height(&self) -> u32 {
        self.layout.tile_height
    }

    pub fn tile_count(&self) -> u64 {
        self.tiles_x as u64 * self.tiles_y as u64
    }

    /// Row-major index into the tile tables, `None` when out of range.
    pub fn tile_index(&self, tile_x: u32, tile_y: u32) -> Option<usize> {
        if tile_x >= self.tiles_x || tile_y >= self.tiles_y {
            return None;
        }
        Some(tile_y as usize * self.tiles_x as usize + tile_x as usize)
    }

    /// Visible size of a tile; edge tiles are clamped to the image.
    pub fn tile_dimensions(&self, tile_x: u32, tile_y: u32) -> Option<(u32, u32)> {
        self.tile_index(tile_x, tile_y)?;
        let x0 = tile_x * self.tile_width();
        let y0 = tile_y * self.tile_height();
        Some((
            self.tile_width().min(self.width - x0),
            self.tile_height().min(self.height - y0),
        ))
    }

    fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// All usable levels of a tiled TIFF, full resolution first.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    pub levels: Vec<TiffLevel>,
    /// ImageDescription of the first IFD, if any
    pub description: Option<String>,
}

impl TiffPyramid {
    /// Reads the header and every IFD, then keeps those forming a pyramid.
    pub async fn parse<R: RangeReader>(reader: &R) -> Result<Self, TiffError> {
        let size = reader.size();
        if size < TIFF_HEADER_SIZE as u64 {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: size,
            });
        }
        let header_len = (BIGTIFF_HEADER_SIZE as u64).min(size) as usize;
        let header_bytes = reader.read_exact_at(0, header_len).await?;
        let header = TiffHeader::parse(&header_bytes, size)?;

        let ifds = read_ifd_chain(reader, &header).await?;
        let values = ValueReader::new(reader, &header);

        let description = match ifds
            .first()
            .and_then(|ifd| ifd.get_entry_by_tag(TiffTag::ImageDescription))
        {
            Some(entry) => values.read_string(entry).await.ok(),
            None => None,
        };

        let mut candidates = Vec::new();
        for (ifd_index, ifd) in ifds.iter().enumerate() {
            if let Some(level) = TiffLevel::from_ifd(&values, ifd, ifd_index).await? {
                candidates.push(level);
            }
        }

        // Stable: equal areas keep file order
        candidates.sort_by_key(|level| std::cmp::Reverse(level.area()));
        let levels = filter_pyramid_levels(candidates);
        if levels.is_empty() {
            return Err(TiffError::NoTiledLevels);
        }

        debug!(
            ifds = ifds.len(),
            levels = levels.len(),
            bigtiff = header.is_bigtiff,
            "parsed TIFF pyramid"
        );

        Ok(Self {
            header,
            levels,
            description,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Level by full-resolution-first index.
    pub fn get_level(&self, index: usize) -> Option<&TiffLevel> {
        self.levels.get(index)
    }

    pub fn base_level(&self) -> Option<&TiffLevel> {
        self.levels.first()
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.base_level().map(|l| (l.width, l.height))
    }
}

/// Follows the next-IFD chain, rejecting loops and runaway chains.
async fn read_ifd_chain<R: RangeReader>(
    reader: &R,
    header: &TiffHeader,
) -> Result<Vec<Ifd>, TiffError> {
    let mut ifds = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = header.first_ifd_offset;

    while offset != 0 && ifds.len() < MAX_IFDS {
        if !seen.insert(offset) || offset >= reader.size() {
            return Err(TiffError::InvalidIfdOffset(offset));
        }

        let count_bytes = reader.read_exact_at(offset, header.ifd_count_size()).await?;
        let entry_count = header.read_entry_count(&count_bytes);
        if entry_count > MAX_IFD_ENTRIES {
            return Err(TiffError::InvalidTagValue {
                tag: "IFD",
                message: format!("{entry_count} entries at offset {offset}"),
            });
        }

        let ifd_size = Ifd::calculate_size(entry_count, header);
        let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
        let ifd = Ifd::parse(&ifd_bytes, header)?;

        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }

    Ok(ifds)
}

/// Keeps candidates (sorted largest first) whose downsample steps are powers of two.
fn filter_pyramid_levels(candidates: Vec<TiffLevel>) -> Vec<TiffLevel> {
    let Some(base) = candidates.first() else {
        return Vec::new();
    };
    let base_width = base.width as f64;
    let base_height = base.height as f64;

    let mut levels: Vec<TiffLevel> = Vec::new();
    for mut level in candidates {
        let downsample_x = base_width / level.width as f64;
        let downsample_y = base_height / level.height as f64;
        let downsample = (downsample_x + downsample_y) / 2.0;

        let previous = levels.last().map(|l| l.downsample);
        if is_valid_downsample(downsample, previous) {
            level.downsample = downsample;
            levels.push(level);
        } else {
            debug!(
                ifd_index = level.ifd_index,
                downsample, "IFD does not fit the pyramid"
            );
        }
    }
    levels
}

/// Whether `downsample` can follow a level at `previous` (or start the pyramid).
fn is_valid_downsample(downsample: f64, previous: Option<f64>) -> bool {
    let Some(previous) = previous else {
        return (downsample - 1.0).abs() < 0.1;
    };

    let exponent = downsample.log2().round();
    if exponent < 1.0 {
        return false;
    }
    let ratio = downsample / 2.0_f64.powf(exponent);
    if !(0.8..1.2).contains(&ratio) {
        return false;
    }

    exponent > previous.log2().round()
}

// =============================================================================
// TileTable
// =============================================================================

/// Byte locations of every tile in one level.
#[derive(Debug, Clone)]
pub struct TileTable {
    locations: Vec<TileLocation>,
}

impl TileTable {
    /// Reads TileOffsets and TileByteCounts for `level`.
    pub async fn load<R: RangeReader>(
        reader: &R,
        header: &TiffHeader,
        level: &TiffLevel,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);
        let offsets = values.read_u64_array(&level.tile_offsets).await?;
        let byte_counts = values.read_u64_array(&level.tile_byte_counts).await?;

        let expected = level.tile_count();
        if (offsets.len() as u64) < expected || (byte_counts.len() as u64) < expected {
            return Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                message: format!(
                    "{} offsets and {} byte counts for {expected} tiles",
                    offsets.len(),
                    byte_counts.len()
                ),
            });
        }

        let locations = offsets
            .into_iter()
            .zip(byte_counts)
            .map(|(offset, length)| TileLocation::new(offset, length))
            .collect();
        Ok(Self { locations })
    }

    pub fn location(&self, index: usize) -> Option<TileLocation> {
        self.locations.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Tiled TIFF and BigTIFF containers.
//!
//! # Key Concepts
//!
//! - **Byte order**: the header declares little-endian (`II`) or big-endian
//!   (`MM`); every multi-byte value is read in that order.
//!
//! - **Classic TIFF vs BigTIFF**: classic TIFF uses 32-bit offsets, BigTIFF
//!   64-bit offsets and counts. Both are handled by the same parser.
//!
//! - **IFD**: one directory per stored image. A pyramidal file holds one
//!   tiled IFD per resolution, each with TileOffsets and TileByteCounts
//!   tables indexed by `row * tiles_across + column`.
//!
//! - **Inline vs offset values**: values that fit in the entry's value field
//!   are stored inline; larger ones are fetched from the offset it holds.

mod parser;
mod pyramid;
mod tags;
mod values;

pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{TiffLevel, TiffPyramid, TileTable};
pub use tags::{Compression, FieldType, Predictor, SampleFormat, TiffTag};
pub use values::ValueReader;

//! Container parsing and tile decoding.
//!
//! - [`tiff`]: TIFF/BigTIFF headers, IFDs and pyramid level discovery
//! - [`decoder`]: one tile from `(offset, length)` to RGBA8
//! - [`compression`], [`jpeg`], [`normalize`]: the decoder's stages
//! - [`detect`]: leading-byte sniffing used by the format registry

pub mod compression;
pub mod decoder;
pub mod detect;
pub mod jpeg;
pub mod normalize;
pub mod tiff;

pub use decoder::{decode_payload, decode_tile, DecodedTile, TileLayout, TileLocation};
pub use detect::{is_tiff_header, sniff, ContentKind, MAGIC_PROBE_BYTES};
pub use normalize::SampleLayout;

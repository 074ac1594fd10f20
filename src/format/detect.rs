//! Content sniffing from leading bytes.
//!
//! The registry reads a short prefix of every input once and hands it to
//! each format's `can_parse`. These helpers classify that prefix:
//!
//! - **TIFF / BigTIFF**: `II*\0`, `MM\0*`, `II+\0`, `MM\0+`
//! - **JPEG**: `FF D8 FF`
//! - **PNG**: the 8-byte PNG signature
//! - **Deep Zoom descriptor**: XML containing an `<Image` element with a
//!   `TileSize` attribute

/// Bytes read from an input for sniffing.
pub const MAGIC_PROBE_BYTES: usize = 512;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// What the leading bytes of an input look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Tiff,
    BigTiff,
    Jpeg,
    Png,
    DeepZoom,
}

impl ContentKind {
    pub const fn name(&self) -> &'static str {
        match self {
            ContentKind::Tiff => "TIFF",
            ContentKind::BigTiff => "BigTIFF",
            ContentKind::Jpeg => "JPEG",
            ContentKind::Png => "PNG",
            ContentKind::DeepZoom => "Deep Zoom descriptor",
        }
    }

    pub const fn is_tiff(&self) -> bool {
        matches!(self, ContentKind::Tiff | ContentKind::BigTiff)
    }

    pub const fn is_raster_image(&self) -> bool {
        matches!(self, ContentKind::Jpeg | ContentKind::Png)
    }
}

/// Classifies `bytes`, `None` when nothing matches.
pub fn sniff(bytes: &[u8]) -> Option<ContentKind> {
    if let Some(kind) = tiff_kind(bytes) {
        return Some(kind);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ContentKind::Jpeg);
    }
    if bytes.starts_with(&PNG_SIGNATURE) {
        return Some(ContentKind::Png);
    }
    if looks_like_dzi(bytes) {
        return Some(ContentKind::DeepZoom);
    }
    None
}

/// Whether the bytes start with a classic or BigTIFF header.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    tiff_kind(bytes).is_some()
}

fn tiff_kind(bytes: &[u8]) -> Option<ContentKind> {
    if bytes.len() < 4 {
        return None;
    }
    let version = match &bytes[0..2] {
        b"II" => u16::from_le_bytes([bytes[2], bytes[3]]),
        b"MM" => u16::from_be_bytes([bytes[2], bytes[3]]),
        _ => return None,
    };
    match version {
        42 => Some(ContentKind::Tiff),
        43 => Some(ContentKind::BigTiff),
        _ => None,
    }
}

fn looks_like_dzi(bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    trimmed.starts_with('<') && trimmed.contains("<Image") && trimmed.contains("TileSize")
}

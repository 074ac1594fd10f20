use thiserror::Error;

/// Errors raised while reading byte ranges from a buffer, a file or a remote URL.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// HTTP request failed or returned an unexpected status
    #[error("HTTP error: {0}")]
    Http(String),

    /// Local filesystem error
    #[error("File error: {0}")]
    File(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::File(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for IoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            IoError::Connection(err.to_string())
        } else {
            IoError::Http(err.to_string())
        }
    }
}

/// Errors that can occur when parsing TIFF containers
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// IFD offset points outside the file or forms a loop
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// No IFD in the file carries a usable tile grid
    #[error("No tiled pyramid levels found")]
    NoTiledLevels,
}

/// Errors raised while turning one stored tile into RGBA pixels.
///
/// These are scoped to a single coordinate: sources log them and report the
/// tile as absent instead of failing the whole image.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// Tile byte range does not fit in the buffer it was read from
    #[error("Tile range out of bounds: {length} bytes at offset {offset}, buffer is {buffer_len}")]
    Bounds {
        offset: u64,
        length: u64,
        buffer_len: u64,
    },

    /// Decompressed payload is shorter than the stored tile requires
    #[error("Truncated tile: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unsupported compression scheme: {0}")]
    UnsupportedCompression(u16),

    /// Sample layout the normalizer cannot express as RGBA8
    #[error("Unsupported sample layout: {0}")]
    UnsupportedLayout(String),

    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// Embedded image codec (JPEG, PNG) failed
    #[error("Image decode failed: {0}")]
    Image(String),
}

/// Failures that affect a whole tile source rather than one coordinate.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("TIFF error: {0}")]
    Tiff(#[from] TiffError),

    /// Image metadata (descriptor, header) is missing or malformed
    #[error("Invalid metadata: {0}")]
    Metadata(String),

    /// Source image could not be decoded at all
    #[error("Image error: {0}")]
    Image(String),

    /// The input kind is not supported by this source
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),
}

/// Errors from resolving an input to a tile source.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// A format hint named a format that is not registered
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    /// Auto-detection found no format; a format hint is required
    #[error("No registered format can parse {0}; pass an explicit format")]
    NoMatchingFormat(String),

    /// A format with the same id is already registered
    #[error("Format already registered: {0}")]
    DuplicateFormat(String),

    #[error("I/O error while probing input: {0}")]
    Io(#[from] IoError),

    #[error("Failed to open source: {0}")]
    Source(#[from] SourceError),
}

/// Invalid cache or command-line configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid byte size '{0}': expected a number with an optional KB/MB/GB/KiB/MiB/GiB suffix")]
    InvalidByteSize(String),

    #[error("{0}")]
    Invalid(String),
}

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use reqwest::Client;
use url::Url;

use crate::error::IoError;
use crate::format::{sniff, ContentKind, MAGIC_PROBE_BYTES};
use crate::io::{FileRangeReader, HttpRangeReader, RangeReader};

// =============================================================================
// SourceInput
// =============================================================================

/// Where an image pyramid comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    /// `http://` or `https://` resource
    Url(String),
    /// Whole file contents already in memory
    Buffer(Bytes),
    File(PathBuf),
}

impl SourceInput {
    /// Interprets a command-line argument: HTTP(S) URLs stay URLs, anything
    /// else is a local path.
    pub fn parse(value: &str) -> Self {
        match Url::parse(value) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Url(value.to_string()),
            _ => Self::File(PathBuf::from(value)),
        }
    }

    /// Lowercased file extension of the URL path or file name.
    pub fn extension(&self) -> Option<String> {
        let ext = match self {
            Self::Url(url) => {
                let parsed = Url::parse(url).ok()?;
                let name = parsed.path_segments()?.next_back()?.to_string();
                let (_, ext) = name.rsplit_once('.')?;
                ext.to_string()
            }
            Self::File(path) => path.extension()?.to_str()?.to_string(),
            Self::Buffer(_) => return None,
        };
        (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
    }
}

impl fmt::Display for SourceInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => write!(f, "{url}"),
            Self::Buffer(bytes) => write!(f, "<buffer of {} bytes>", bytes.len()),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<PathBuf> for SourceInput {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

impl From<&Path> for SourceInput {
    fn from(path: &Path) -> Self {
        Self::File(path.to_path_buf())
    }
}

impl From<Bytes> for SourceInput {
    fn from(bytes: Bytes) -> Self {
        Self::Buffer(bytes)
    }
}

impl From<Vec<u8>> for SourceInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffer(Bytes::from(bytes))
    }
}

// =============================================================================
// SourceProbe
// =============================================================================

/// What detection knows about an input: its extension and leading bytes.
///
/// Built once per resolution and shared by every format's `can_parse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceProbe {
    pub extension: Option<String>,
    /// Up to [`MAGIC_PROBE_BYTES`] leading bytes
    pub magic: Bytes,
    pub kind: Option<ContentKind>,
}

impl SourceProbe {
    pub fn new(extension: Option<&str>, magic: impl Into<Bytes>) -> Self {
        let magic = magic.into();
        Self {
            extension: extension.map(str::to_ascii_lowercase),
            kind: sniff(&magic),
            magic,
        }
    }

    /// Reads the leading bytes of `input`.
    pub async fn read(input: &SourceInput, client: &Client) -> Result<Self, IoError> {
        let magic = match input {
            SourceInput::Buffer(bytes) => bytes.slice(..bytes.len().min(MAGIC_PROBE_BYTES)),
            SourceInput::File(path) => read_prefix(&FileRangeReader::open(path).await?).await?,
            SourceInput::Url(url) => {
                read_prefix(&HttpRangeReader::new(client.clone(), url.as_str()).await?).await?
            }
        };
        Ok(Self::new(input.extension().as_deref(), magic))
    }

    pub fn has_extension(&self, candidates: &[&str]) -> bool {
        self.extension
            .as_deref()
            .is_some_and(|ext| candidates.contains(&ext))
    }
}

async fn read_prefix(reader: &dyn RangeReader) -> Result<Bytes, IoError> {
    let len = reader.size().min(MAGIC_PROBE_BYTES as u64) as usize;
    reader.read_exact_at(0, len).await
}

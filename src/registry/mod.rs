//! Format registry: maps an input to the tile source able to read it.
//!
//! # Resolution Order
//!
//! ```text
//! SourceInput ──► SourceProbe (extension + leading bytes, read once)
//!                     │
//!                     ▼
//!     custom formats, highest priority first (ties keep registration order)
//!                     │ none can parse
//!                     ▼
//!     built-in formats, in registration order
//!                     │ none can parse
//!                     ▼
//!     RegistryError::NoMatchingFormat
//! ```
//!
//! A format hint skips detection entirely. An unknown hint is a
//! configuration error and fails immediately.
//!
//! The registry is an ordinary value: construct one, register formats on it,
//! and pass it to whatever opens sources.

mod builtin;
mod input;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::error::{RegistryError, SourceError};
use crate::source::TileSource;

pub use builtin::{DziFormat, ImageFormat, TiffFormat};
pub use input::{SourceInput, SourceProbe};

// =============================================================================
// FormatParser Trait
// =============================================================================

/// One pluggable image format.
#[async_trait]
pub trait FormatParser: Send + Sync {
    /// Unique id, also accepted as a format hint.
    fn id(&self) -> &str;

    /// Ordering among custom formats; higher is tried first.
    fn priority(&self) -> i32 {
        0
    }

    /// Whether this format recognizes the probed input.
    fn can_parse(&self, probe: &SourceProbe) -> bool;

    async fn open(&self, input: &SourceInput) -> Result<Box<dyn TileSource>, SourceError>;
}

// =============================================================================
// FormatRegistry
// =============================================================================

/// Ordered collection of formats.
pub struct FormatRegistry {
    client: Client,
    /// Sorted by descending priority
    custom: Vec<Box<dyn FormatParser>>,
    builtin: Vec<Box<dyn FormatParser>>,
}

impl FormatRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// An empty registry that probes URLs with `client`.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            custom: Vec::new(),
            builtin: Vec::new(),
        }
    }

    /// A registry holding the TIFF, Deep Zoom and single-image formats.
    pub fn with_builtin_formats() -> Self {
        Self::with_client(Client::new()).add_builtin_formats()
    }

    /// Adds the built-in formats, sharing this registry's HTTP client.
    pub fn add_builtin_formats(mut self) -> Self {
        self.builtin = vec![
            Box::new(TiffFormat::new(self.client.clone())),
            Box::new(DziFormat::new(self.client.clone())),
            Box::new(ImageFormat::new(self.client.clone())),
        ];
        self
    }

    /// Registers a custom format ahead of the built-ins.
    pub fn register(&mut self, parser: Box<dyn FormatParser>) -> Result<(), RegistryError> {
        if self.get(parser.id()).is_some() {
            return Err(RegistryError::DuplicateFormat(parser.id().to_string()));
        }

        let priority = parser.priority();
        let position = self
            .custom
            .iter()
            .position(|existing| existing.priority() < priority)
            .unwrap_or(self.custom.len());
        debug!(format = parser.id(), priority, position, "registered format");
        self.custom.insert(position, parser);
        Ok(())
    }

    /// Removes a format by id, custom or built-in.
    pub fn unregister(&mut self, id: &str) -> Option<Box<dyn FormatParser>> {
        for list in [&mut self.custom, &mut self.builtin] {
            if let Some(index) = list.iter().position(|parser| parser.id() == id) {
                return Some(list.remove(index));
            }
        }
        None
    }

    pub fn get(&self, id: &str) -> Option<&dyn FormatParser> {
        self.parsers().find(|parser| parser.id() == id)
    }

    /// Format ids in resolution order.
    pub fn format_ids(&self) -> Vec<&str> {
        self.parsers().map(|parser| parser.id()).collect()
    }

    fn parsers(&self) -> impl Iterator<Item = &dyn FormatParser> {
        self.custom
            .iter()
            .chain(self.builtin.iter())
            .map(|parser| parser.as_ref())
    }

    /// First format whose `can_parse` accepts an already-built probe.
    pub fn resolve_probe(&self, probe: &SourceProbe) -> Option<&dyn FormatParser> {
        self.parsers().find(|parser| parser.can_parse(probe))
    }

    /// Probes `input` once and picks the first format that accepts it.
    pub async fn resolve(&self, input: &SourceInput) -> Result<&dyn FormatParser, RegistryError> {
        let probe = SourceProbe::read(input, &self.client).await?;
        self.resolve_probe(&probe)
            .ok_or_else(|| RegistryError::NoMatchingFormat(input.to_string()))
    }

    /// Opens `input`, by explicit format id when `hint` is given.
    pub async fn open(
        &self,
        input: &SourceInput,
        hint: Option<&str>,
    ) -> Result<Box<dyn TileSource>, RegistryError> {
        let parser = match hint {
            Some(id) => self
                .get(id)
                .ok_or_else(|| RegistryError::UnknownFormat(id.to_string()))?,
            None => self.resolve(input).await?,
        };

        debug!(format = parser.id(), input = %input, "opening source");
        Ok(parser.open(input).await?)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

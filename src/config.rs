//! Command-line configuration.
//!
//! Every option can also be set through an environment variable with the
//! `GIGATILE_` prefix:
//!
//! - `GIGATILE_FORMAT` - Format id that bypasses auto-detection
//! - `GIGATILE_HEADERS` - Extra HTTP headers, `Name: value`, comma-separated
//! - `GIGATILE_CACHE_SIZE` - CPU budget of the tile cache (default: 512MB)
//! - `GIGATILE_GPU_BUDGET` - GPU byte figure tracked by the cache (default: 1GiB)
//! - `GIGATILE_MAX_TILES` - Tile-count ceiling of the cache (default: none)
//! - `GIGATILE_PREFERRED_LEVELS` - Levels kept longest under pressure

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::error::ConfigError;
use crate::registry::SourceInput;
use crate::tile::CacheConfig;

// =============================================================================
// Default Values
// =============================================================================

/// Default CPU budget for the `warm` command.
pub const DEFAULT_CACHE_SIZE: &str = "512MiB";

/// Default GPU budget for the `warm` command.
pub const DEFAULT_GPU_BUDGET: &str = "1GiB";

// =============================================================================
// CLI Arguments
// =============================================================================

/// gigatile - inspect and load tiles of gigapixel image pyramids.
#[derive(Parser, Debug, Clone)]
#[command(name = "gigatile")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print image size and per-level tiling of a source
    Info(InfoConfig),
    /// Decode one tile and write it as an image file
    Extract(ExtractConfig),
    /// Load every tile of a level through the cache and print cache statistics
    Warm(WarmConfig),
}

/// Options shared by every command that opens a source.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// File path or http(s) URL of the image pyramid.
    pub source: String,

    /// Format id (tiff, dzi, image); skips auto-detection.
    #[arg(long, env = "GIGATILE_FORMAT")]
    pub format: Option<String>,

    /// Extra HTTP header sent with every request, as `Name: value`.
    #[arg(long = "header", env = "GIGATILE_HEADERS", value_delimiter = ',')]
    pub headers: Vec<String>,
}

impl SourceArgs {
    pub fn input(&self) -> SourceInput {
        SourceInput::parse(&self.source)
    }

    /// Splits each `Name: value` header argument.
    pub fn header_pairs(&self) -> Result<Vec<(&str, &str)>, ConfigError> {
        self.headers
            .iter()
            .map(|header| {
                let (name, value) = header.split_once(':').ok_or_else(|| {
                    ConfigError::Invalid(format!("header '{header}' must look like 'Name: value'"))
                })?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::Invalid(format!("header '{header}' has no name")));
                }
                Ok((name, value.trim()))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.trim().is_empty() {
            return Err(ConfigError::Invalid("source must not be empty".to_string()));
        }
        if self.format.as_deref().is_some_and(|f| f.trim().is_empty()) {
            return Err(ConfigError::Invalid("format must not be empty".to_string()));
        }
        self.header_pairs()?;
        Ok(())
    }
}

#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Print JSON instead of a table.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExtractConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Pyramid level, 0 = coarsest.
    #[arg(long)]
    pub level: u32,

    /// Tile column.
    #[arg(long)]
    pub x: u32,

    /// Tile row.
    #[arg(long)]
    pub y: u32,

    /// Output file; the extension selects the encoding (png, jpg).
    #[arg(short, long)]
    pub output: PathBuf,
}

impl ExtractConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate()?;
        let ext = self
            .output
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("png" | "jpg" | "jpeg") => Ok(()),
            _ => Err(ConfigError::Invalid(format!(
                "output '{}' must end in .png, .jpg or .jpeg",
                self.output.display()
            ))),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct WarmConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Pyramid level to load, 0 = coarsest.
    #[arg(long)]
    pub level: u32,

    /// CPU byte budget of the cache, e.g. 256MB or 1GiB.
    #[arg(long, default_value = DEFAULT_CACHE_SIZE, env = "GIGATILE_CACHE_SIZE")]
    pub cache_size: String,

    /// GPU byte budget tracked by the cache.
    #[arg(long, default_value = DEFAULT_GPU_BUDGET, env = "GIGATILE_GPU_BUDGET")]
    pub gpu_budget: String,

    /// Maximum number of cached tiles.
    #[arg(long, env = "GIGATILE_MAX_TILES")]
    pub max_tiles: Option<usize>,

    /// Levels evicted last (comma-separated).
    #[arg(long, env = "GIGATILE_PREFERRED_LEVELS", value_delimiter = ',')]
    pub preferred_levels: Vec<u32>,
}

impl WarmConfig {
    /// Cache configuration described by these options.
    pub fn cache_config(&self) -> Result<CacheConfig, ConfigError> {
        let config = CacheConfig {
            max_cpu_bytes: parse_byte_size(&self.cache_size)?,
            max_gpu_bytes: parse_byte_size(&self.gpu_budget)?,
            max_tiles: self.max_tiles,
            preferred_levels: self.preferred_levels.clone(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate()?;
        self.cache_config().map(|_| ())
    }
}

// =============================================================================
// Byte Sizes
// =============================================================================

/// Parses `512`, `100KB`, `1.5MB`, `2GiB` and similar.
///
/// Decimal suffixes (KB, MB, GB) are powers of 1000; binary suffixes
/// (KiB, MiB, GiB) powers of 1024. A bare `B` is allowed.
pub fn parse_byte_size(value: &str) -> Result<u64, ConfigError> {
    let invalid = || ConfigError::InvalidByteSize(value.to_string());
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    let multiplier: u64 = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "kb" | "k" => 1_000,
        "mb" | "m" => 1_000_000,
        "gb" | "g" => 1_000_000_000,
        "kib" => 1 << 10,
        "mib" => 1 << 20,
        "gib" => 1 << 30,
        _ => return Err(invalid()),
    };

    if number.is_empty() {
        return Err(invalid());
    }
    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }
    let fractional: f64 = number.parse().map_err(|_| invalid())?;
    let bytes = fractional * multiplier as f64;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes.round() as u64)
}

// =============================================================================
// Tests
// =============================================================================

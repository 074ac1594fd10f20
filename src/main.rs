//! gigatile - command-line access to gigapixel image pyramids.

use std::process::ExitCode;

use clap::Parser;
use image::DynamicImage;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gigatile::{
    config::{Cli, Command, ExtractConfig, InfoConfig, SourceArgs, WarmConfig},
    registry::FormatRegistry,
    source::{build_headers, LevelInfo, TileSource},
    tile::TileLoader,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Info(config) => run_info(config).await,
        Command::Extract(config) => run_extract(config).await,
        Command::Warm(config) => run_warm(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "gigatile=debug"
    } else {
        "gigatile=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolves the source named on the command line.
async fn open_source(args: &SourceArgs) -> Result<Box<dyn TileSource>, String> {
    args.validate().map_err(|e| e.to_string())?;

    let pairs = args.header_pairs().map_err(|e| e.to_string())?;
    let headers = build_headers(pairs).map_err(|e| e.to_string())?;
    let client = reqwest::Client::builder()
        .default_headers(headers)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))?;

    let registry = FormatRegistry::with_client(client).add_builtin_formats();
    let input = args.input();
    let source = registry
        .open(&input, args.format.as_deref())
        .await
        .map_err(|e| e.to_string())?;

    info!(format = source.format_id(), source = %input, "opened source");
    Ok(source)
}

// =============================================================================
// Info Command
// =============================================================================

#[derive(Debug, Serialize)]
struct SourceSummary {
    format: &'static str,
    width: u32,
    height: u32,
    tile_size: u32,
    level_count: u32,
    levels: Vec<LevelInfo>,
}

fn summarize(source: &dyn TileSource) -> Result<SourceSummary, String> {
    let (width, height) = source.image_size().map_err(|e| e.to_string())?;
    let level_count = source.level_count().map_err(|e| e.to_string())?;
    Ok(SourceSummary {
        format: source.format_id(),
        width,
        height,
        tile_size: source.tile_size().map_err(|e| e.to_string())?,
        level_count,
        levels: (0..level_count)
            .filter_map(|level| source.level_info(level))
            .collect(),
    })
}

async fn run_info(config: InfoConfig) -> ExitCode {
    let source = match open_source(&config.source).await {
        Ok(source) => source,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let summary = match summarize(source.as_ref()) {
        Ok(summary) => summary,
        Err(e) => {
            error!("Failed to read metadata: {}", e);
            return ExitCode::FAILURE;
        }
    };
    source.destroy().await;

    if config.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to serialize summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("Format:     {}", summary.format);
    println!("Size:       {} x {}", summary.width, summary.height);
    println!("Tile size:  {}", summary.tile_size);
    println!("Levels:     {}", summary.level_count);
    println!();
    println!("level      width     height   tiles  downsample");
    println!("─────  ─────────  ─────────  ──────  ──────────");
    for level in &summary.levels {
        println!(
            "{:>5}  {:>9}  {:>9}  {:>6}  {:>10.2}",
            level.level,
            level.width,
            level.height,
            format!("{}x{}", level.tiles_x, level.tiles_y),
            level.downsample
        );
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Extract Command
// =============================================================================

async fn run_extract(config: ExtractConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let source = match open_source(&config.source).await {
        Ok(source) => source,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let tile = match source.get_tile(config.level, config.x, config.y).await {
        Ok(Some(tile)) => tile,
        Ok(None) => {
            error!(
                "No tile at level {} ({}, {})",
                config.level, config.x, config.y
            );
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Failed to read tile: {}", e);
            return ExitCode::FAILURE;
        }
    };
    source.destroy().await;

    let Some(image) = tile.to_image() else {
        error!("Tile {} has no pixel data", tile.key());
        return ExitCode::FAILURE;
    };

    // JPEG has no alpha channel
    let is_jpeg = config
        .output
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));
    let result = if is_jpeg {
        DynamicImage::ImageRgba8(image).to_rgb8().save(&config.output)
    } else {
        image.save(&config.output)
    };

    if let Err(e) = result {
        error!("Failed to write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        tile = %tile.key(),
        width = tile.width(),
        height = tile.height(),
        output = %config.output.display(),
        "wrote tile"
    );
    ExitCode::SUCCESS
}

// =============================================================================
// Warm Command
// =============================================================================

async fn run_warm(config: WarmConfig) -> ExitCode {
    let cache_config = match config.cache_config() {
        Ok(cache_config) => cache_config,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let source = match open_source(&config.source).await {
        Ok(source) => source,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut loader = TileLoader::new(source, cache_config);
    let loaded = match loader.warm_level(config.level).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Failed to warm level {}: {}", config.level, e);
            return ExitCode::FAILURE;
        }
    };
    info!(level = config.level, loaded, "level loaded");

    let stats = loader.cache().stats();
    loader.close().await;

    match serde_json::to_string_pretty(&stats) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize statistics: {}", e);
            ExitCode::FAILURE
        }
    }
}

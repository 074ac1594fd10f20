//! Format detection and opening through `FormatRegistry`.

use std::collections::HashMap;

use async_trait::async_trait;
use image::ImageFormat;

use gigatile::registry::{FormatParser, FormatRegistry, SourceInput, SourceProbe};
use gigatile::source::{ImageTileSource, TileSource};
use gigatile::{RegistryError, SourceError};

use super::test_utils::{encode_image, gradient_image, LevelSpec, TestServer, TiffBuilder};

fn tiff_bytes() -> Vec<u8> {
    TiffBuilder::new()
        .level(LevelSpec::rgb_gradient(64, 64))
        .level(LevelSpec::rgb_gradient(32, 32))
        .build()
}

async fn format_of(registry: &FormatRegistry, input: &SourceInput) -> &'static str {
    match registry.open(input, None).await {
        Ok(source) => source.format_id(),
        Err(e) => panic!("failed to open {input}: {e}"),
    }
}

/// Custom format that claims every PNG and serves it as a 4x4 source.
struct TinyPng;

#[async_trait]
impl FormatParser for TinyPng {
    fn id(&self) -> &str {
        "tiny-png"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn can_parse(&self, probe: &SourceProbe) -> bool {
        probe.magic.starts_with(b"\x89PNG")
    }

    async fn open(&self, _input: &SourceInput) -> Result<Box<dyn TileSource>, SourceError> {
        Ok(Box::new(ImageTileSource::new(gradient_image(4, 4), 4)?))
    }
}

// =============================================================================
// Detection
// =============================================================================

#[tokio::test]
async fn test_detects_tiff_buffer() {
    let registry = FormatRegistry::with_builtin_formats();
    let input = SourceInput::from(tiff_bytes());

    assert_eq!(registry.resolve(&input).await.unwrap().id(), "tiff");
    let source = registry.open(&input, None).await.unwrap();
    assert_eq!(source.level_count().unwrap(), 2);
    assert_eq!(source.image_size().unwrap(), (64, 64));
}

#[tokio::test]
async fn test_detects_raster_images() {
    let registry = FormatRegistry::with_builtin_formats();
    for format in [ImageFormat::Png, ImageFormat::Jpeg] {
        let input = SourceInput::from(encode_image(&gradient_image(300, 200), format));
        assert_eq!(format_of(&registry, &input).await, "image");

        let source = registry.open(&input, None).await.unwrap();
        assert_eq!(source.image_size().unwrap(), (300, 200));
        assert_eq!(source.level_count().unwrap(), 2);
    }
}

#[tokio::test]
async fn test_detects_tiff_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pyramid.tif");
    tokio::fs::write(&path, tiff_bytes()).await.unwrap();

    let registry = FormatRegistry::with_builtin_formats();
    let input = SourceInput::parse(path.to_str().unwrap());
    assert!(matches!(input, SourceInput::File(_)));

    let source = registry.open(&input, None).await.unwrap();
    assert_eq!(source.format_id(), "tiff");
    let tile = source.get_tile(1, 3, 3).await.unwrap().unwrap();
    assert_eq!((tile.image_x(), tile.image_y()), (48, 48));
}

#[tokio::test]
async fn test_unrecognized_input() {
    let registry = FormatRegistry::with_builtin_formats();
    let input = SourceInput::from(b"plain text, not an image".to_vec());

    assert!(matches!(
        registry.resolve(&input).await,
        Err(RegistryError::NoMatchingFormat(_))
    ));
    assert!(matches!(
        registry.open(&input, None).await,
        Err(RegistryError::NoMatchingFormat(_))
    ));
}

#[tokio::test]
async fn test_missing_file_is_an_io_error() {
    let registry = FormatRegistry::with_builtin_formats();
    let input = SourceInput::parse("/nonexistent/gigatile/missing.tif");
    assert!(matches!(
        registry.open(&input, None).await,
        Err(RegistryError::Io(_))
    ));
}

// =============================================================================
// Hints and Custom Formats
// =============================================================================

#[tokio::test]
async fn test_hint_skips_detection() {
    let registry = FormatRegistry::with_builtin_formats();
    let input = SourceInput::from(tiff_bytes());

    let source = registry.open(&input, Some("tiff")).await.unwrap();
    assert_eq!(source.format_id(), "tiff");

    assert!(matches!(
        registry.open(&input, Some("jp2")).await,
        Err(RegistryError::UnknownFormat(id)) if id == "jp2"
    ));

    // Forcing the wrong format surfaces that format's failure
    assert!(matches!(
        registry.open(&input, Some("image")).await,
        Err(RegistryError::Source(SourceError::Image(_)))
    ));
}

#[tokio::test]
async fn test_custom_format_outranks_builtin() {
    let mut registry = FormatRegistry::with_builtin_formats();
    registry.register(Box::new(TinyPng)).unwrap();
    assert!(matches!(
        registry.register(Box::new(TinyPng)),
        Err(RegistryError::DuplicateFormat(_))
    ));

    let png = SourceInput::from(encode_image(&gradient_image(64, 64), ImageFormat::Png));
    let source = registry.open(&png, None).await.unwrap();
    assert_eq!(source.image_size().unwrap(), (4, 4));

    // TIFF is untouched by the custom format
    let tiff = SourceInput::from(tiff_bytes());
    assert_eq!(format_of(&registry, &tiff).await, "tiff");

    assert!(registry.unregister("tiny-png").is_some());
    assert_eq!(format_of(&registry, &png).await, "image");
}

// =============================================================================
// Remote Inputs
// =============================================================================

#[tokio::test]
async fn test_detects_remote_tiff_and_dzi() {
    let descriptor = r#"<?xml version="1.0" encoding="UTF-8"?>
<Image xmlns="http://schemas.microsoft.com/deepzoom/2008" TileSize="254" Overlap="1" Format="png">
  <Size Width="1000" Height="600"/>
</Image>"#;
    let mut routes = HashMap::new();
    routes.insert("/slide.tif".to_string(), tiff_bytes());
    routes.insert("/slide.dzi".to_string(), descriptor.as_bytes().to_vec());
    let server = TestServer::start(routes).await;

    let registry = FormatRegistry::with_builtin_formats();

    let tiff = SourceInput::parse(&server.url("/slide.tif"));
    assert!(matches!(tiff, SourceInput::Url(_)));
    let source = registry.open(&tiff, None).await.unwrap();
    assert_eq!(source.format_id(), "tiff");
    let tile = source.get_tile(0, 1, 0).await.unwrap().unwrap();
    assert_eq!((tile.width(), tile.height()), (16, 16));

    let dzi = SourceInput::parse(&server.url("/slide.dzi"));
    let source = registry.open(&dzi, None).await.unwrap();
    assert_eq!(source.format_id(), "dzi");
    assert_eq!(source.image_size().unwrap(), (1000, 600));
    assert_eq!(source.tile_size().unwrap(), 254);
    assert_eq!(source.level_count().unwrap(), 11);
}

#[tokio::test]
async fn test_dzi_requires_url_input() {
    let registry = FormatRegistry::with_builtin_formats();
    let input = SourceInput::from(b"<Image TileSize=\"256\" Overlap=\"0\" Format=\"jpg\"><Size Width=\"10\" Height=\"10\"/></Image>".to_vec());

    assert_eq!(registry.resolve(&input).await.unwrap().id(), "dzi");
    assert!(matches!(
        registry.open(&input, None).await,
        Err(RegistryError::Source(SourceError::UnsupportedInput(_)))
    ));
}

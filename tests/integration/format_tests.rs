//! Tiled TIFF decoding through `TiffTileSource`.

use image::{ImageFormat, Rgba, RgbaImage};

use gigatile::io::MemoryRangeReader;
use gigatile::source::{TiffTileSource, TileSource};
use gigatile::tile::Tile;
use gigatile::SourceError;

use super::test_utils::{
    encode_image, rgb_gradient_sample, LevelSpec, TiffBuilder, TrackingReader, COMPRESSION_DEFLATE,
    COMPRESSION_LZW,
};

async fn open(data: Vec<u8>) -> TiffTileSource<MemoryRangeReader> {
    TiffTileSource::open(MemoryRangeReader::new(data))
        .await
        .expect("valid TIFF")
}

fn pixel(tile: &Tile, x: u32, y: u32) -> [u8; 4] {
    let pixels = tile.pixels().expect("loaded tile");
    let i = ((y * tile.width() + x) * 4) as usize;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

fn gradient_rgba(x: u32, y: u32) -> [u8; 4] {
    [
        rgb_gradient_sample(x, y, 0) as u8,
        rgb_gradient_sample(x, y, 1) as u8,
        rgb_gradient_sample(x, y, 2) as u8,
        255,
    ]
}

/// Checks every pixel of a gradient tile against the level-space gradient.
fn assert_gradient_tile(tile: &Tile) {
    for y in 0..tile.height() {
        for x in 0..tile.width() {
            assert_eq!(
                pixel(tile, x, y),
                gradient_rgba(tile.image_x() + x, tile.image_y() + y),
                "pixel ({x}, {y}) of tile {}",
                tile.key()
            );
        }
    }
}

// =============================================================================
// Compression Schemes
// =============================================================================

#[tokio::test]
async fn test_uncompressed_rgb_tiles() {
    let data = TiffBuilder::new().level(LevelSpec::rgb_gradient(40, 24)).build();
    let source = open(data).await;

    assert_eq!(source.image_size().unwrap(), (40, 24));
    assert_eq!(source.level_count().unwrap(), 1);
    assert_eq!(source.tile_size().unwrap(), 16);

    let tile = source.get_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!((tile.width(), tile.height()), (16, 16));
    assert_gradient_tile(&tile);
}

#[tokio::test]
async fn test_edge_tiles_are_clamped() {
    let data = TiffBuilder::new().level(LevelSpec::rgb_gradient(40, 24)).build();
    let source = open(data).await;

    let tile = source.get_tile(0, 2, 1).await.unwrap().unwrap();
    assert_eq!((tile.image_x(), tile.image_y()), (32, 16));
    assert_eq!((tile.width(), tile.height()), (8, 8));
    assert_eq!(tile.byte_size(), 8 * 8 * 4);
    assert_eq!(pixel(&tile, 0, 0), [32, 16, 48, 255]);
    assert_gradient_tile(&tile);
}

#[tokio::test]
async fn test_deflate_and_lzw_tiles() {
    for compression in [COMPRESSION_DEFLATE, COMPRESSION_LZW] {
        let level = LevelSpec::rgb_gradient(40, 24).compression(compression);
        let source = open(TiffBuilder::new().level(level).build()).await;

        for (x, y) in [(0, 0), (1, 0), (2, 1)] {
            let tile = source.get_tile(0, x, y).await.unwrap().unwrap();
            assert_gradient_tile(&tile);
        }
    }
}

#[tokio::test]
async fn test_horizontal_predictor_with_deflate() {
    let level = LevelSpec::rgb_gradient(40, 24)
        .compression(COMPRESSION_DEFLATE)
        .predictor(2);
    let source = open(TiffBuilder::new().level(level).build()).await;

    let tile = source.get_tile(0, 1, 1).await.unwrap().unwrap();
    assert_gradient_tile(&tile);
}

#[tokio::test]
async fn test_jpeg_tile() {
    let solid = RgbaImage::from_pixel(16, 16, Rgba([200, 100, 50, 255]));
    let jpeg = encode_image(&solid, ImageFormat::Jpeg);
    let level = LevelSpec::jpeg(16, 16, 16, vec![jpeg], None);
    let source = open(TiffBuilder::new().level(level).build()).await;

    let tile = source.get_tile(0, 0, 0).await.unwrap().unwrap();
    let [r, g, b, a] = pixel(&tile, 8, 8);
    assert!(r.abs_diff(200) <= 8 && g.abs_diff(100) <= 8 && b.abs_diff(50) <= 8);
    assert_eq!(a, 255);
}

// =============================================================================
// Sample Layouts
// =============================================================================

#[tokio::test]
async fn test_grayscale_replicated() {
    let level = LevelSpec::from_fn(20, 20, 1, 8, |x, y, _| ((x * 10 + y) % 256) as u16);
    let source = open(TiffBuilder::new().level(level).build()).await;

    let tile = source.get_tile(0, 1, 1).await.unwrap().unwrap();
    assert_eq!((tile.width(), tile.height()), (4, 4));
    // Level pixel (17, 18)
    assert_eq!(pixel(&tile, 1, 2), [188, 188, 188, 255]);
}

#[tokio::test]
async fn test_gray_alpha() {
    let level = LevelSpec::from_fn(16, 16, 2, 8, |x, _, c| if c == 0 { x as u16 } else { 128 });
    let source = open(TiffBuilder::new().level(level).build()).await;

    let tile = source.get_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!(pixel(&tile, 5, 0), [5, 5, 5, 128]);
}

#[tokio::test]
async fn test_rgba_passthrough() {
    let level = LevelSpec::from_fn(16, 16, 4, 8, |x, y, c| [x, y, 9, 77][c as usize] as u16);
    let source = open(TiffBuilder::new().level(level).build()).await;

    let tile = source.get_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!(pixel(&tile, 3, 4), [3, 4, 9, 77]);
}

#[tokio::test]
async fn test_white_is_zero_inverted() {
    let level = LevelSpec::from_fn(16, 16, 1, 8, |_, _, _| 40).photometric(0);
    let source = open(TiffBuilder::new().level(level).build()).await;

    let tile = source.get_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!(pixel(&tile, 0, 0), [215, 215, 215, 255]);
}

#[tokio::test]
async fn test_sixteen_bit_rescaled() {
    // k * 257 rescales exactly to k
    let level = LevelSpec::from_fn(16, 16, 3, 16, |x, y, c| {
        rgb_gradient_sample(x, y, c) * 257
    })
    .compression(COMPRESSION_DEFLATE)
    .predictor(2);

    for builder in [TiffBuilder::new(), TiffBuilder::new().big_endian()] {
        let source = open(builder.level(level.clone()).build()).await;
        let tile = source.get_tile(0, 0, 0).await.unwrap().unwrap();
        assert_gradient_tile(&tile);
    }
}

// =============================================================================
// Containers
// =============================================================================

#[tokio::test]
async fn test_big_endian_and_bigtiff() {
    let files = [
        TiffBuilder::new().big_endian(),
        TiffBuilder::new().bigtiff(),
        TiffBuilder::new().bigtiff().big_endian(),
    ];
    for builder in files {
        let data = builder
            .level(LevelSpec::rgb_gradient(40, 24).compression(COMPRESSION_LZW))
            .build();
        let source = open(data).await;
        assert_eq!(source.image_size().unwrap(), (40, 24));
        let tile = source.get_tile(0, 2, 0).await.unwrap().unwrap();
        assert_gradient_tile(&tile);
    }
}

#[tokio::test]
async fn test_pyramid_levels_coarsest_first() {
    let data = TiffBuilder::new()
        .description("synthetic pyramid")
        .level(LevelSpec::rgb_gradient(64, 64))
        // Thumbnail that is not a power-of-two step
        .level(LevelSpec::rgb_gradient(48, 48))
        .level(LevelSpec::rgb_gradient(32, 32))
        .level(LevelSpec::rgb_gradient(16, 16))
        // Mask image
        .level(LevelSpec::rgb_gradient(8, 8).subfile_type(4))
        .build();
    let source = open(data).await;

    assert_eq!(source.level_count().unwrap(), 3);
    assert_eq!(source.image_size().unwrap(), (64, 64));
    assert_eq!(source.pyramid().description.as_deref(), Some("synthetic pyramid"));

    let coarsest = source.level_info(0).unwrap();
    assert_eq!((coarsest.width, coarsest.height), (16, 16));
    assert_eq!((coarsest.tiles_x, coarsest.tiles_y), (1, 1));
    assert!((coarsest.downsample - 4.0).abs() < 1e-9);

    let native = source.level_info(2).unwrap();
    assert_eq!((native.width, native.tiles_x), (64, 4));
    assert!(source.level_info(3).is_none());

    // Level 1 is the 32x32 IFD: its tile (1, 1) starts at (16, 16) of that IFD
    let tile = source.get_tile(1, 1, 1).await.unwrap().unwrap();
    assert_eq!((tile.image_x(), tile.image_y()), (16, 16));
    assert_gradient_tile(&tile);
}

#[tokio::test]
async fn test_not_a_tiff() {
    let reader = MemoryRangeReader::new(b"definitely not a tiff file".to_vec());
    assert!(matches!(
        TiffTileSource::open(reader).await,
        Err(SourceError::Tiff(_))
    ));
}

// =============================================================================
// Misses
// =============================================================================

#[tokio::test]
async fn test_holes_and_out_of_range_are_misses() {
    let level = LevelSpec::rgb_gradient(32, 32).hole(1);
    let source = open(TiffBuilder::new().level(level).build()).await;

    assert!(source.get_tile(0, 0, 0).await.unwrap().is_some());
    assert!(source.get_tile(0, 1, 0).await.unwrap().is_none());
    assert!(source.get_tile(0, 2, 0).await.unwrap().is_none());
    assert!(source.get_tile(0, 0, 2).await.unwrap().is_none());
    assert!(source.get_tile(1, 0, 0).await.unwrap().is_none());
}

#[tokio::test]
async fn test_corrupt_payload_is_a_miss() {
    let level = LevelSpec::jpeg(32, 16, 16, vec![b"garbage".to_vec(), b"more".to_vec()], None);
    let source = open(TiffBuilder::new().level(level).build()).await;

    assert!(source.get_tile(0, 0, 0).await.unwrap().is_none());
    assert!(source.get_tile(0, 1, 0).await.unwrap().is_none());
}

#[tokio::test]
async fn test_decoded_tiles_are_reused() {
    let data = TiffBuilder::new()
        .level(LevelSpec::rgb_gradient(32, 32).compression(COMPRESSION_DEFLATE))
        .build();
    let reader = TrackingReader::new(data, "mem://pyramid.tif");
    let source = TiffTileSource::open(reader.clone()).await.unwrap();

    let first = source.get_tile(0, 1, 1).await.unwrap().unwrap();
    let after_first = reader.request_count();
    let second = source.get_tile(0, 1, 1).await.unwrap().unwrap();
    assert_eq!(reader.request_count(), after_first);
    assert_eq!(first.pixels(), second.pixels());

    // Releasing the source drops its decoded tiles
    source.destroy().await;
    source.get_tile(0, 1, 1).await.unwrap().unwrap();
    assert!(reader.request_count() > after_first);
}

#[tokio::test]
async fn test_decoded_cache_can_be_disabled() {
    let data = TiffBuilder::new().level(LevelSpec::rgb_gradient(16, 16)).build();
    let reader = TrackingReader::new(data, "mem://single.tif");
    let source = TiffTileSource::with_decoded_capacity(reader.clone(), 0)
        .await
        .unwrap();

    source.get_tile(0, 0, 0).await.unwrap().unwrap();
    let before = reader.request_count();
    source.get_tile(0, 0, 0).await.unwrap().unwrap();
    assert!(reader.request_count() > before);
}

//! Remote tile sources against a local HTTP server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use image::{imageops, ImageFormat, RgbaImage};

use gigatile::io::{HttpRangeReader, MemoryRangeReader, RangeReader};
use gigatile::pyramid::PyramidGeometry;
use gigatile::source::{DziDescriptor, DziTileSource, TemplateTileSource, TiffTileSource, TileSource};
use gigatile::tile::Tile;
use gigatile::IoError;

use tower::ServiceExt;

use super::test_utils::{
    encode_image, fixture_router, gradient_image, LevelSpec, TestServer, TiffBuilder, COMPRESSION_LZW,
};

fn png_region(image: &RgbaImage, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
    let region = imageops::crop_imm(image, x, y, width, height).to_image();
    encode_image(&region, ImageFormat::Png)
}

/// Asserts the tile holds `gradient_image` pixels at its level position.
fn assert_matches_gradient(tile: &Tile) {
    let pixels = tile.pixels().unwrap();
    for y in 0..tile.height() {
        for x in 0..tile.width() {
            let i = ((y * tile.width() + x) * 4) as usize;
            let expected = [(tile.image_x() + x) as u8, (tile.image_y() + y) as u8, 7, 255];
            assert_eq!(&pixels[i..i + 4], &expected, "pixel ({x}, {y}) of {}", tile.key());
        }
    }
}

// =============================================================================
// Deep Zoom
// =============================================================================

async fn dzi_server() -> TestServer {
    let descriptor = DziDescriptor {
        tile_size: 32,
        overlap: 1,
        format: "png".to_string(),
        width: 100,
        height: 60,
    };
    let native = gradient_image(100, 60);

    let mut routes = HashMap::new();
    routes.insert("/scan.dzi".to_string(), descriptor.to_xml().into_bytes());
    // Level 7 is full resolution; tiles carry a 1px overlap on interior edges
    routes.insert("/scan_files/7/0_0.png".to_string(), png_region(&native, 0, 0, 33, 33));
    routes.insert("/scan_files/7/1_1.png".to_string(), png_region(&native, 31, 31, 34, 29));
    routes.insert("/scan_files/7/3_0.png".to_string(), png_region(&native, 95, 0, 5, 33));
    routes.insert("/scan_files/7/2_0.png".to_string(), b"not an image".to_vec());
    TestServer::start(routes).await
}

#[tokio::test]
async fn test_dzi_metadata() {
    let server = dzi_server().await;
    let source = DziTileSource::open(reqwest::Client::new(), &server.url("/scan.dzi"), Default::default())
        .await
        .unwrap();

    assert_eq!(source.image_size().unwrap(), (100, 60));
    assert_eq!(source.level_count().unwrap(), 8);
    assert_eq!(source.descriptor().overlap, 1);

    let coarsest = source.level_info(0).unwrap();
    assert_eq!((coarsest.width, coarsest.height), (1, 1));
    let native = source.level_info(7).unwrap();
    assert_eq!((native.tiles_x, native.tiles_y), (4, 2));
    assert_eq!(
        source.tile_url(7, 1, 1),
        format!("{}/scan_files/7/1_1.png", server.base_url)
    );
}

#[tokio::test]
async fn test_dzi_tiles_strip_overlap() {
    let server = dzi_server().await;
    let source = DziTileSource::open(reqwest::Client::new(), &server.url("/scan.dzi"), Default::default())
        .await
        .unwrap();

    let first = source.get_tile(7, 0, 0).await.unwrap().unwrap();
    assert_eq!((first.width(), first.height()), (32, 32));
    assert_matches_gradient(&first);

    let interior = source.get_tile(7, 1, 1).await.unwrap().unwrap();
    assert_eq!((interior.image_x(), interior.image_y()), (32, 32));
    assert_eq!((interior.width(), interior.height()), (32, 28));
    assert_matches_gradient(&interior);

    let edge = source.get_tile(7, 3, 0).await.unwrap().unwrap();
    assert_eq!((edge.width(), edge.height()), (4, 32));
    assert_matches_gradient(&edge);
}

#[tokio::test]
async fn test_dzi_failed_tiles_are_misses() {
    let server = dzi_server().await;
    let source = DziTileSource::open(reqwest::Client::new(), &server.url("/scan.dzi"), Default::default())
        .await
        .unwrap();

    // 404
    assert!(source.get_tile(7, 1, 0).await.unwrap().is_none());
    // Undecodable body
    assert!(source.get_tile(7, 2, 0).await.unwrap().is_none());

    // Outside the grid: no request is made
    let before = server.hits();
    assert!(source.get_tile(7, 4, 0).await.unwrap().is_none());
    assert!(source.get_tile(8, 0, 0).await.unwrap().is_none());
    assert_eq!(server.hits(), before);
}

#[tokio::test]
async fn test_dzi_missing_descriptor() {
    let server = TestServer::start(HashMap::new()).await;
    let result =
        DziTileSource::open(reqwest::Client::new(), &server.url("/gone.dzi"), Default::default())
            .await;
    assert!(result.is_err());
}

// =============================================================================
// URL Template
// =============================================================================

#[tokio::test]
async fn test_template_source() {
    let native = gradient_image(100, 60);
    let mut routes = HashMap::new();
    routes.insert("/tiles/2/3/1.png".to_string(), png_region(&native, 96, 32, 4, 28));
    routes.insert(
        "/tiles/0/0/0.png".to_string(),
        encode_image(&RgbaImage::new(25, 15), ImageFormat::Png),
    );
    let server = TestServer::start(routes).await;

    let geometry = PyramidGeometry::for_image(100, 60, 32);
    let source =
        TemplateTileSource::new(server.url("/tiles/{z}/{x}/{y}.png"), geometry).unwrap();
    assert_eq!(source.level_count().unwrap(), 3);

    let edge = source.get_tile(2, 3, 1).await.unwrap().unwrap();
    assert_eq!((edge.image_x(), edge.image_y(), edge.width(), edge.height()), (96, 32, 4, 28));
    assert_matches_gradient(&edge);

    let coarsest = source.get_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!((coarsest.width(), coarsest.height()), (25, 15));

    assert!(source.get_tile(2, 0, 0).await.unwrap().is_none());
    assert!(source.get_tile(0, 1, 0).await.unwrap().is_none());
}

// =============================================================================
// HTTP Range Reads
// =============================================================================

#[tokio::test]
async fn test_fixture_router_serves_ranges() {
    let mut routes = HashMap::new();
    routes.insert("/blob".to_string(), (0u8..10).collect::<Vec<_>>());
    let hits = Arc::new(AtomicUsize::new(0));
    let router = fixture_router(routes, Arc::clone(&hits));

    let request = Request::builder()
        .uri("/blob")
        .header(header::RANGE, "bytes=2-5")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], &[2, 3, 4, 5]);

    let request = Request::builder().uri("/blob").body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let request = Request::builder().uri("/other").body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_remote_tiff_matches_local() {
    let data = TiffBuilder::new()
        .level(LevelSpec::rgb_gradient(64, 48).compression(COMPRESSION_LZW))
        .build();
    let mut routes = HashMap::new();
    routes.insert("/remote.tif".to_string(), data.clone());
    let server = TestServer::start(routes).await;

    let reader = HttpRangeReader::open(server.url("/remote.tif")).await.unwrap();
    assert_eq!(reader.size(), data.len() as u64);
    assert_eq!(&reader.read_exact_at(0, 4).await.unwrap()[..], &data[..4]);
    assert!(matches!(
        reader.read_exact_at(reader.size() - 2, 10).await,
        Err(IoError::RangeOutOfBounds { .. })
    ));

    let remote = TiffTileSource::open(reader).await.unwrap();
    let local = TiffTileSource::open(MemoryRangeReader::new(data)).await.unwrap();
    for (x, y) in [(0, 0), (3, 2), (2, 1)] {
        let a = remote.get_tile(0, x, y).await.unwrap().unwrap();
        let b = local.get_tile(0, x, y).await.unwrap().unwrap();
        assert_eq!(a.pixels(), b.pixels());
    }
}

#[tokio::test]
async fn test_remote_not_found() {
    let server = TestServer::start(HashMap::new()).await;
    assert!(matches!(
        HttpRangeReader::open(server.url("/missing.tif")).await,
        Err(IoError::NotFound(_))
    ));
}

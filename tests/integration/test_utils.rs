//! Test utilities for integration tests.
//!
//! Synthetic tiled TIFF files, a range reader that records its requests and a
//! local HTTP server for the remote sources.

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use image::{ImageFormat, RgbaImage};
use tokio::net::TcpListener;
use tokio::sync::RwLock;

use gigatile::error::IoError;
use gigatile::io::RangeReader;

// =============================================================================
// Tracking Range Reader
// =============================================================================

/// In-memory range reader that records every request.
///
/// Clones share the same counters, so a test can keep one handle while a
/// source owns another.
#[derive(Clone)]
pub struct TrackingReader {
    data: Bytes,
    identifier: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<RwLock<Vec<(u64, usize)>>>,
}

impl TrackingReader {
    pub fn new(data: Vec<u8>, identifier: impl Into<String>) -> Self {
        Self {
            data: Bytes::from(data),
            identifier: identifier.into(),
            request_count: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl RangeReader for TrackingReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        self.requests.write().await.push((offset, len));

        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// TIFF Writer
// =============================================================================

pub const COMPRESSION_NONE: u16 = 1;
pub const COMPRESSION_LZW: u16 = 5;
pub const COMPRESSION_JPEG: u16 = 7;
pub const COMPRESSION_DEFLATE: u16 = 8;

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;
const TYPE_UNDEFINED: u16 = 7;
const TYPE_LONG8: u16 = 16;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn put(self, buf: &mut Vec<u8>, value: u64, size: usize) {
        match self {
            Endian::Little => buf.extend_from_slice(&value.to_le_bytes()[..size]),
            Endian::Big => buf.extend_from_slice(&value.to_be_bytes()[8 - size..]),
        }
    }

    fn patch(self, buf: &mut [u8], pos: usize, value: u64, size: usize) {
        let mut encoded = Vec::with_capacity(size);
        self.put(&mut encoded, value, size);
        buf[pos..pos + size].copy_from_slice(&encoded);
    }
}

/// One image directory: dimensions, sample layout and pixel content.
#[derive(Clone)]
pub struct LevelSpec {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub compression: u16,
    pub predictor: u16,
    pub photometric: Option<u16>,
    pub subfile_type: Option<u32>,
    /// Row-major image samples, `width * height * samples_per_pixel`
    samples: Vec<u16>,
    holes: Vec<usize>,
    encoded_tiles: Option<Vec<Vec<u8>>>,
    jpeg_tables: Option<Vec<u8>>,
}

impl LevelSpec {
    /// A level whose sample `c` at `(x, y)` is `sample(x, y, c)`.
    pub fn from_fn(
        width: u32,
        height: u32,
        samples_per_pixel: u16,
        bits_per_sample: u16,
        sample: impl Fn(u32, u32, u16) -> u16,
    ) -> Self {
        let mut samples = Vec::with_capacity((width * height) as usize * samples_per_pixel as usize);
        for y in 0..height {
            for x in 0..width {
                for c in 0..samples_per_pixel {
                    samples.push(sample(x, y, c));
                }
            }
        }

        Self {
            width,
            height,
            tile_width: 16,
            tile_height: 16,
            samples_per_pixel,
            bits_per_sample,
            compression: COMPRESSION_NONE,
            predictor: 1,
            photometric: None,
            subfile_type: None,
            samples,
            holes: Vec::new(),
            encoded_tiles: None,
            jpeg_tables: None,
        }
    }

    /// 8-bit RGB level with `(x, y, x + y)` pixels.
    pub fn rgb_gradient(width: u32, height: u32) -> Self {
        Self::from_fn(width, height, 3, 8, |x, y, c| rgb_gradient_sample(x, y, c))
    }

    /// JPEG-compressed level whose tiles are the given streams.
    pub fn jpeg(
        width: u32,
        height: u32,
        tile_size: u32,
        tiles: Vec<Vec<u8>>,
        tables: Option<Vec<u8>>,
    ) -> Self {
        let mut level = Self::from_fn(width, height, 3, 8, |_, _, _| 0).tiles(tile_size, tile_size);
        level.compression = COMPRESSION_JPEG;
        level.photometric = Some(2);
        level.encoded_tiles = Some(tiles);
        level.jpeg_tables = tables;
        level
    }

    pub fn tiles(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.tile_width = tile_width;
        self.tile_height = tile_height;
        self
    }

    pub fn compression(mut self, compression: u16) -> Self {
        self.compression = compression;
        self
    }

    pub fn predictor(mut self, predictor: u16) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn photometric(mut self, photometric: u16) -> Self {
        self.photometric = Some(photometric);
        self
    }

    pub fn subfile_type(mut self, subfile_type: u32) -> Self {
        self.subfile_type = Some(subfile_type);
        self
    }

    /// Marks a tile (row-major index) as absent: offset and length 0.
    pub fn hole(mut self, index: usize) -> Self {
        self.holes.push(index);
        self
    }

    pub fn tiles_across(&self) -> u32 {
        self.width.div_ceil(self.tile_width)
    }

    pub fn tiles_down(&self) -> u32 {
        self.height.div_ceil(self.tile_height)
    }

    fn encode_tiles(&self, order: Endian) -> Vec<Option<Vec<u8>>> {
        if let Some(encoded) = &self.encoded_tiles {
            return encoded.iter().cloned().map(Some).collect();
        }

        let mut tiles = Vec::new();
        for ty in 0..self.tiles_down() {
            for tx in 0..self.tiles_across() {
                let index = (ty * self.tiles_across() + tx) as usize;
                if self.holes.contains(&index) {
                    tiles.push(None);
                } else {
                    tiles.push(Some(self.encode_tile(tx, ty, order)));
                }
            }
        }
        tiles
    }

    fn encode_tile(&self, tx: u32, ty: u32, order: Endian) -> Vec<u8> {
        let spp = self.samples_per_pixel as usize;
        let tw = self.tile_width as usize;
        let th = self.tile_height as usize;

        // Stored tiles are padded to the full tile size with zeros
        let mut samples = vec![0u16; tw * th * spp];
        for y in 0..th {
            for x in 0..tw {
                let ix = tx as usize * tw + x;
                let iy = ty as usize * th + y;
                if ix >= self.width as usize || iy >= self.height as usize {
                    continue;
                }
                let src = (iy * self.width as usize + ix) * spp;
                let dst = (y * tw + x) * spp;
                samples[dst..dst + spp].copy_from_slice(&self.samples[src..src + spp]);
            }
        }

        if self.predictor == 2 {
            for row in samples.chunks_exact_mut(tw * spp) {
                for i in (spp..row.len()).rev() {
                    row[i] = row[i].wrapping_sub(row[i - spp]);
                }
            }
        }

        let mut raw = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            match self.bits_per_sample {
                8 => raw.push(sample as u8),
                _ => order.put(&mut raw, sample as u64, 2),
            }
        }
        compress(&raw, self.compression)
    }
}

/// Sample values of [`LevelSpec::rgb_gradient`].
pub fn rgb_gradient_sample(x: u32, y: u32, c: u16) -> u16 {
    match c {
        0 => (x % 256) as u16,
        1 => (y % 256) as u16,
        _ => ((x + y) % 256) as u16,
    }
}

pub fn compress(raw: &[u8], compression: u16) -> Vec<u8> {
    match compression {
        COMPRESSION_DEFLATE => {
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(raw).unwrap();
            encoder.finish().unwrap()
        }
        COMPRESSION_LZW => weezl::encode::Encoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
            .encode(raw)
            .unwrap(),
        _ => raw.to_vec(),
    }
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u64,
    data: Vec<u8>,
}

/// Writes a TIFF or BigTIFF file from level descriptions, in IFD order.
pub struct TiffBuilder {
    order: Endian,
    bigtiff: bool,
    description: Option<String>,
    levels: Vec<LevelSpec>,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self {
            order: Endian::Little,
            bigtiff: false,
            description: None,
            levels: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.order = Endian::Big;
        self
    }

    pub fn bigtiff(mut self) -> Self {
        self.bigtiff = true;
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn level(mut self, level: LevelSpec) -> Self {
        self.levels.push(level);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let order = self.order;
        let offset_size = if self.bigtiff { 8 } else { 4 };

        let mut out = Vec::new();
        out.extend_from_slice(match order {
            Endian::Little => b"II",
            Endian::Big => b"MM",
        });
        if self.bigtiff {
            order.put(&mut out, 43, 2);
            order.put(&mut out, 8, 2);
            order.put(&mut out, 0, 2);
        } else {
            order.put(&mut out, 42, 2);
        }
        let mut next_pointer = out.len();
        order.put(&mut out, 0, offset_size);

        let mut locations = Vec::new();
        for level in &self.levels {
            let mut level_locations = Vec::new();
            for tile in level.encode_tiles(order) {
                match tile {
                    Some(bytes) if !bytes.is_empty() => {
                        level_locations.push((out.len() as u64, bytes.len() as u64));
                        out.extend_from_slice(&bytes);
                    }
                    _ => level_locations.push((0, 0)),
                }
            }
            locations.push(level_locations);
        }

        for (index, level) in self.levels.iter().enumerate() {
            if out.len() % 2 == 1 {
                out.push(0);
            }
            let ifd_offset = out.len() as u64;
            order.patch(&mut out, next_pointer, ifd_offset, offset_size);
            let description = if index == 0 { self.description.as_deref() } else { None };
            let entries = self.entries(level, &locations[index], description);
            next_pointer = self.write_ifd(&mut out, entries);
        }
        out
    }

    fn entries(&self, level: &LevelSpec, locations: &[(u64, u64)], description: Option<&str>) -> Vec<Entry> {
        let order = self.order;
        let shorts = |values: &[u16]| {
            let mut data = Vec::new();
            for &v in values {
                order.put(&mut data, v as u64, 2);
            }
            Entry { tag: 0, field_type: TYPE_SHORT, count: values.len() as u64, data }
        };
        let long = |value: u32| {
            let mut data = Vec::new();
            order.put(&mut data, value as u64, 4);
            Entry { tag: 0, field_type: TYPE_LONG, count: 1, data }
        };
        let offsets = |values: Vec<u64>| {
            let (field_type, size) = if self.bigtiff { (TYPE_LONG8, 8) } else { (TYPE_LONG, 4) };
            let mut data = Vec::new();
            for v in &values {
                order.put(&mut data, *v, size);
            }
            Entry { tag: 0, field_type, count: values.len() as u64, data }
        };
        let tagged = |tag: u16, entry: Entry| Entry { tag, ..entry };

        let photometric = level
            .photometric
            .unwrap_or(if level.samples_per_pixel >= 3 { 2 } else { 1 });
        let bits = vec![level.bits_per_sample; level.samples_per_pixel as usize];

        let mut entries = vec![
            tagged(256, long(level.width)),
            tagged(257, long(level.height)),
            tagged(258, shorts(&bits[..])),
            tagged(259, shorts(&[level.compression][..])),
            tagged(262, shorts(&[photometric][..])),
            tagged(277, shorts(&[level.samples_per_pixel][..])),
            tagged(322, long(level.tile_width)),
            tagged(323, long(level.tile_height)),
            tagged(324, offsets(locations.iter().map(|l| l.0).collect())),
            tagged(325, offsets(locations.iter().map(|l| l.1).collect())),
        ];
        if let Some(subfile_type) = level.subfile_type {
            entries.push(tagged(254, long(subfile_type)));
        }
        if level.predictor != 1 {
            entries.push(tagged(317, shorts(&[level.predictor][..])));
        }
        if let Some(tables) = &level.jpeg_tables {
            entries.push(Entry {
                tag: 347,
                field_type: TYPE_UNDEFINED,
                count: tables.len() as u64,
                data: tables.clone(),
            });
        }
        if let Some(text) = description {
            let mut data = text.as_bytes().to_vec();
            data.push(0);
            entries.push(Entry {
                tag: 270,
                field_type: TYPE_ASCII,
                count: data.len() as u64,
                data,
            });
        }
        entries
    }

    /// Appends one IFD and its out-of-line values; returns the position of
    /// its next-IFD pointer.
    fn write_ifd(&self, out: &mut Vec<u8>, mut entries: Vec<Entry>) -> usize {
        entries.sort_by_key(|e| e.tag);
        let order = self.order;
        let (count_size, entry_size, inline) = if self.bigtiff { (8, 20, 8) } else { (2, 12, 4) };

        let start = out.len();
        let table_len = count_size + entries.len() * entry_size + inline;
        let external_base = start + table_len;

        let mut table = Vec::with_capacity(table_len);
        let mut external = Vec::new();
        order.put(&mut table, entries.len() as u64, count_size);
        for entry in &entries {
            order.put(&mut table, entry.tag as u64, 2);
            order.put(&mut table, entry.field_type as u64, 2);
            order.put(&mut table, entry.count, if self.bigtiff { 8 } else { 4 });
            if entry.data.len() <= inline {
                table.extend_from_slice(&entry.data);
                table.resize(table.len() + inline - entry.data.len(), 0);
            } else {
                if external.len() % 2 == 1 {
                    external.push(0);
                }
                order.put(&mut table, (external_base + external.len()) as u64, inline);
                external.extend_from_slice(&entry.data);
            }
        }

        let next_pointer = start + table.len();
        table.resize(table.len() + inline, 0);
        out.extend_from_slice(&table);
        out.extend_from_slice(&external);
        next_pointer
    }
}

impl Default for TiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Images
// =============================================================================

/// Encodes `image` in the given container format.
pub fn encode_image(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let mut out = std::io::Cursor::new(Vec::new());
    if format == ImageFormat::Jpeg {
        image::DynamicImage::ImageRgba8(image.clone())
            .to_rgb8()
            .write_to(&mut out, format)
            .unwrap();
    } else {
        image.write_to(&mut out, format).unwrap();
    }
    out.into_inner()
}

/// RGBA image with `(x, y, 7, 255)` pixels.
pub fn gradient_image(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| image::Rgba([x as u8, y as u8, 7, 255]))
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Shared state behind the fixture router.
#[derive(Clone)]
struct Fixtures {
    routes: Arc<HashMap<String, Vec<u8>>>,
    hits: Arc<AtomicUsize>,
}

/// Local HTTP server for fixed routes, backed by an axum router.
///
/// Answers GET and HEAD; a single `Range: bytes=a-b` header yields 206 with
/// `Content-Range`. Unknown paths answer 404.
pub struct TestServer {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub async fn start(routes: HashMap<String, Vec<u8>>) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = fixture_router(routes, Arc::clone(&hits));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Requests answered so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Router serving `routes` by exact path, counting every request in `hits`.
pub fn fixture_router(routes: HashMap<String, Vec<u8>>, hits: Arc<AtomicUsize>) -> Router {
    let state = Fixtures {
        routes: Arc::new(routes),
        hits,
    };
    Router::new()
        .route("/{*path}", get(serve_fixture))
        .with_state(state)
}

async fn serve_fixture(State(fixtures): State<Fixtures>, uri: Uri, headers: HeaderMap) -> Response {
    fixtures.hits.fetch_add(1, Ordering::SeqCst);

    let Some(body) = fixtures.routes.get(uri.path()) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range)
    {
        Some((start, end)) if start < body.len() => {
            let end = end.min(body.len() - 1);
            let content_range = format!("bytes {start}-{end}/{}", body.len());
            (
                StatusCode::PARTIAL_CONTENT,
                [(header::CONTENT_RANGE, content_range)],
                body[start..=end].to_vec(),
            )
                .into_response()
        }
        _ => body.clone().into_response(),
    }
}

/// `bytes=a-b` → `(a, b)`
fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, end) = value.trim().strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

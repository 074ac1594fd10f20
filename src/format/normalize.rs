//! Sample normalization to 8-bit RGBA.
//!
//! | channels | output                     |
//! |----------|----------------------------|
//! | 1        | gray, gray, gray, 255      |
//! | 2        | gray, gray, gray, alpha    |
//! | 3        | r, g, b, 255               |
//! | 4+       | r, g, b, a (extras dropped)|
//!
//! Samples wider than 8 bits are rescaled linearly onto 0..=255 first.

use crate::error::DecodeError;

use super::tiff::{ByteOrder, SampleFormat};

/// Photometric interpretation where 0 is white (grayscale only).
pub const PHOTOMETRIC_WHITE_IS_ZERO: u16 = 0;
pub const PHOTOMETRIC_BLACK_IS_ZERO: u16 = 1;
pub const PHOTOMETRIC_RGB: u16 = 2;
pub const PHOTOMETRIC_YCBCR: u16 = 6;

/// How samples are packed in a decompressed, chunky (interleaved) tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    pub bits_per_sample: u16,
    pub samples_per_pixel: u16,
    pub sample_format: SampleFormat,
    pub byte_order: ByteOrder,
    pub photometric: u16,
}

impl SampleLayout {
    /// 8-bit unsigned chunky samples.
    pub fn u8(samples_per_pixel: u16) -> Self {
        Self {
            bits_per_sample: 8,
            samples_per_pixel,
            sample_format: SampleFormat::Unsigned,
            byte_order: ByteOrder::LittleEndian,
            photometric: if samples_per_pixel >= 3 {
                PHOTOMETRIC_RGB
            } else {
                PHOTOMETRIC_BLACK_IS_ZERO
            },
        }
    }

    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8)
    }

    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        self.bytes_per_sample() * self.samples_per_pixel as usize
    }

    /// Rejects layouts the normalizer cannot express.
    pub fn validate(&self) -> Result<(), DecodeError> {
        if self.samples_per_pixel == 0 {
            return Err(DecodeError::UnsupportedLayout("zero samples per pixel".into()));
        }
        match (self.bits_per_sample, self.sample_format) {
            (8 | 16 | 32, SampleFormat::Unsigned | SampleFormat::Signed | SampleFormat::Undefined) => {}
            (32, SampleFormat::Float) => {}
            (bits, format) => {
                return Err(DecodeError::UnsupportedLayout(format!(
                    "{bits}-bit {format:?} samples"
                )))
            }
        }
        match self.photometric {
            PHOTOMETRIC_WHITE_IS_ZERO | PHOTOMETRIC_BLACK_IS_ZERO | PHOTOMETRIC_RGB => Ok(()),
            other => Err(DecodeError::UnsupportedLayout(format!(
                "photometric interpretation {other}"
            ))),
        }
    }

    fn read_sample(&self, bytes: &[u8]) -> u8 {
        match (self.bits_per_sample, self.sample_format) {
            (8, SampleFormat::Signed) => bytes[0] ^ 0x80,
            (8, _) => bytes[0],
            (16, format) => {
                let mut v = self.byte_order.read_u16(bytes);
                if format == SampleFormat::Signed {
                    v ^= 0x8000;
                }
                rescale_u16(v)
            }
            (32, SampleFormat::Float) => {
                let v = f32::from_bits(self.byte_order.read_u32(bytes));
                rescale_unit_float(v)
            }
            (_, format) => {
                let mut v = self.byte_order.read_u32(bytes);
                if format == SampleFormat::Signed {
                    v ^= 0x8000_0000;
                }
                rescale_u32(v)
            }
        }
    }
}

/// Maps 0..=65535 onto 0..=255, rounding to nearest.
#[inline]
pub fn rescale_u16(v: u16) -> u8 {
    ((v as u32 * 255 + 32767) / 65535) as u8
}

#[inline]
pub fn rescale_u32(v: u32) -> u8 {
    ((v as u64 * 255 + (u32::MAX as u64 / 2)) / u32::MAX as u64) as u8
}

/// Maps 0.0..=1.0 onto 0..=255; out-of-range and NaN values are clamped.
#[inline]
pub fn rescale_unit_float(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Expands up to four 8-bit channel values into one RGBA pixel.
#[inline]
pub fn expand_to_rgba(channels: &[u8]) -> [u8; 4] {
    match channels {
        [g] => [*g, *g, *g, 255],
        [g, a] => [*g, *g, *g, *a],
        [r, g, b] => [*r, *g, *b, 255],
        [r, g, b, a, ..] => [*r, *g, *b, *a],
        [] => [0, 0, 0, 255],
    }
}

/// Converts a decompressed tile into tightly packed RGBA8.
///
/// `stored_width` is the padded row length in pixels; only the top-left
/// `width` x `height` pixels are emitted.
pub fn normalize_to_rgba(
    raw: &[u8],
    layout: &SampleLayout,
    stored_width: u32,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, DecodeError> {
    layout.validate()?;
    if width > stored_width {
        return Err(DecodeError::UnsupportedLayout(format!(
            "visible width {width} exceeds stored width {stored_width}"
        )));
    }
    if width == 0 || height == 0 {
        return Ok(Vec::new());
    }

    let bytes_per_sample = layout.bytes_per_sample();
    let bytes_per_pixel = layout.bytes_per_pixel();
    let row_stride = stored_width as usize * bytes_per_pixel;
    let needed = (height as usize - 1) * row_stride + width as usize * bytes_per_pixel;
    if raw.len() < needed {
        return Err(DecodeError::Truncated {
            expected: needed,
            actual: raw.len(),
        });
    }

    let channels = (layout.samples_per_pixel as usize).min(4);
    let invert = layout.photometric == PHOTOMETRIC_WHITE_IS_ZERO && channels <= 2;
    let mut out = Vec::with_capacity(width as usize * height as usize * 4);
    let mut pixel = [0u8; 4];

    for row in raw.chunks(row_stride).take(height as usize) {
        for px in row.chunks_exact(bytes_per_pixel).take(width as usize) {
            for (c, slot) in pixel.iter_mut().enumerate().take(channels) {
                let start = c * bytes_per_sample;
                *slot = layout.read_sample(&px[start..start + bytes_per_sample]);
            }
            if invert {
                pixel[0] = 255 - pixel[0];
            }
            out.extend_from_slice(&expand_to_rgba(&pixel[..channels]));
        }
    }

    Ok(out)
}

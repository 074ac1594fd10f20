//! Tile payload decompression and predictor reversal.

use std::io::Read;

use flate2::read::ZlibDecoder;
use weezl::{decode::Decoder as LzwDecoder, BitOrder, LzwStatus};

use crate::error::DecodeError;

use super::tiff::{ByteOrder, Compression};

/// Decompresses a non-JPEG tile payload.
///
/// `expected_len` is the size of the padded, uncompressed tile. Deflate and
/// LZW streams that inflate past it are rejected; PackBits output is cut at it.
pub fn decompress(
    data: &[u8],
    compression: Compression,
    expected_len: usize,
) -> Result<Vec<u8>, DecodeError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Deflate | Compression::AdobeDeflate => {
            let mut out = Vec::with_capacity(expected_len);
            ZlibDecoder::new(data)
                .take(expected_len as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| DecodeError::Decompress(format!("deflate: {e}")))?;
            check_len("deflate", &out, expected_len)?;
            Ok(out)
        }
        Compression::Lzw => decode_lzw(data, expected_len),
        Compression::PackBits => unpack_bits(data, expected_len),
        other => Err(DecodeError::UnsupportedCompression(other as u16)),
    }
}

fn check_len(codec: &str, out: &[u8], limit: usize) -> Result<(), DecodeError> {
    if out.len() > limit {
        return Err(DecodeError::Decompress(format!(
            "{codec}: output exceeds {limit} bytes"
        )));
    }
    Ok(())
}

/// TIFF-flavoured LZW, decoded in chunks so output stops just past `limit`.
fn decode_lzw(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = LzwDecoder::with_tiff_size_switch(BitOrder::Msb, 8);
    let mut out = Vec::with_capacity(limit);
    let mut chunk = [0u8; 4096];
    let mut input = data;

    loop {
        let result = decoder.decode_bytes(input, &mut chunk);
        input = &input[result.consumed_in..];
        out.extend_from_slice(&chunk[..result.consumed_out]);
        check_len("lzw", &out, limit)?;

        match result
            .status
            .map_err(|e| DecodeError::Decompress(format!("lzw: {e}")))?
        {
            LzwStatus::Ok => {}
            // End code, or input ran out without one
            LzwStatus::Done | LzwStatus::NoProgress => return Ok(out),
        }
    }
}

/// PackBits run-length decoding, stopping once `limit` bytes are produced.
fn unpack_bits(data: &[u8], limit: usize) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::with_capacity(limit);
    let mut pos = 0;

    while pos < data.len() && out.len() < limit {
        let header = data[pos] as i8;
        pos += 1;
        match header {
            0..=127 => {
                let n = header as usize + 1;
                let literal = data
                    .get(pos..pos + n)
                    .ok_or_else(|| DecodeError::Decompress("packbits: literal run past end".into()))?;
                out.extend_from_slice(literal);
                pos += n;
            }
            -127..=-1 => {
                let n = (1 - header as isize) as usize;
                let byte = *data
                    .get(pos)
                    .ok_or_else(|| DecodeError::Decompress("packbits: repeat run past end".into()))?;
                out.resize(out.len() + n, byte);
                pos += 1;
            }
            // -128 is a no-op
            _ => {}
        }
    }

    out.truncate(limit);
    Ok(out)
}

/// Reverses horizontal differencing (predictor 2) in place.
///
/// Each sample was stored as the difference from the same channel of the
/// previous pixel in the row, so accumulation runs per channel with a stride
/// of `samples_per_pixel`. Multi-byte samples accumulate in their own width
/// using the file's byte order.
pub fn undo_horizontal_predictor(
    data: &mut [u8],
    row_pixels: usize,
    samples_per_pixel: usize,
    bytes_per_sample: usize,
    byte_order: ByteOrder,
) -> Result<(), DecodeError> {
    let row_bytes = row_pixels * samples_per_pixel * bytes_per_sample;
    if row_bytes == 0 {
        return Ok(());
    }

    for row in data.chunks_mut(row_bytes) {
        match bytes_per_sample {
            1 => {
                for i in samples_per_pixel..row.len() {
                    row[i] = row[i].wrapping_add(row[i - samples_per_pixel]);
                }
            }
            2 => accumulate::<2>(row, samples_per_pixel, |prev, cur| {
                let sum = read_u16(prev, byte_order).wrapping_add(read_u16(cur, byte_order));
                write_u16(cur, sum, byte_order);
            }),
            4 => accumulate::<4>(row, samples_per_pixel, |prev, cur| {
                let sum = read_u32(prev, byte_order).wrapping_add(read_u32(cur, byte_order));
                write_u32(cur, sum, byte_order);
            }),
            other => {
                return Err(DecodeError::UnsupportedLayout(format!(
                    "horizontal predictor on {}-bit samples",
                    other * 8
                )))
            }
        }
    }
    Ok(())
}

fn accumulate<const W: usize>(
    row: &mut [u8],
    samples_per_pixel: usize,
    mut add: impl FnMut(&[u8; W], &mut [u8; W]),
) {
    let stride = samples_per_pixel * W;
    let mut i = stride;
    while i + W <= row.len() {
        let (head, tail) = row.split_at_mut(i);
        let mut prev = [0u8; W];
        prev.copy_from_slice(&head[i - stride..i - stride + W]);
        let cur: &mut [u8; W] = match (&mut tail[..W]).try_into() {
            Ok(cur) => cur,
            Err(_) => return,
        };
        add(&prev, cur);
        i += W;
    }
}

fn read_u16(bytes: &[u8; 2], order: ByteOrder) -> u16 {
    match order {
        ByteOrder::LittleEndian => u16::from_le_bytes(*bytes),
        ByteOrder::BigEndian => u16::from_be_bytes(*bytes),
    }
}

fn write_u16(bytes: &mut [u8; 2], value: u16, order: ByteOrder) {
    *bytes = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
}

fn read_u32(bytes: &[u8; 4], order: ByteOrder) -> u32 {
    match order {
        ByteOrder::LittleEndian => u32::from_le_bytes(*bytes),
        ByteOrder::BigEndian => u32::from_be_bytes(*bytes),
    }
}

fn write_u32(bytes: &mut [u8; 4], value: u32, order: ByteOrder) {
    *bytes = match order {
        ByteOrder::LittleEndian => value.to_le_bytes(),
        ByteOrder::BigEndian => value.to_be_bytes(),
    };
}

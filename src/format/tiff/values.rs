//! Reading tag values that may live inline or out of line.
//!
//! Out-of-line arrays (TileOffsets, TileByteCounts, JPEGTables) are fetched
//! with a single range read each.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{decode_unsigned, ByteOrder, IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Upper bound on a single tag value; larger values are treated as corrupt.
const MAX_VALUE_BYTES: u64 = 256 * 1024 * 1024;

/// Reads tag values through a [`RangeReader`] using the file's byte order.
pub struct ValueReader<'a, R: RangeReader> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Raw value bytes, from the entry itself or from the file.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if size > MAX_VALUE_BYTES {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("value of {size} bytes exceeds limit"),
            });
        }

        if entry.is_inline {
            return Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ));
        }

        let offset = entry.value_offset(self.header.byte_order);
        Ok(self.reader.read_exact_at(offset, size as usize).await?)
    }

    /// Unsigned integer array (BYTE, SHORT, LONG, LONG8 or IFD8) widened to u64.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = unsigned_type(entry)?;
        if entry.count == 0 {
            return Ok(Vec::new());
        }
        if let Some(values) = entry.inline_values(self.header.byte_order) {
            return Ok(values);
        }

        let bytes = self.read_bytes(entry).await?;
        Ok(decode_unsigned(
            &bytes,
            field_type,
            entry.count as usize,
            self.header.byte_order,
        ))
    }

    /// Unsigned integer array narrowed to u32; values that overflow are rejected.
    pub async fn read_u32_array(&self, entry: &IfdEntry) -> Result<Vec<u32>, TiffError> {
        self.read_u64_array(entry)
            .await?
            .into_iter()
            .map(|v| {
                u32::try_from(v).map_err(|_| TiffError::InvalidTagValue {
                    tag: tag_name(entry),
                    message: format!("value {v} does not fit in 32 bits"),
                })
            })
            .collect()
    }

    /// First value of an unsigned scalar entry.
    pub async fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if entry.count != 1 {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected count 1, got {}", entry.count),
            });
        }
        let values = self.read_u64_array(entry).await?;
        values.first().copied().ok_or(TiffError::InvalidTagValue {
            tag: tag_name(entry),
            message: "empty value".to_string(),
        })
    }

    /// ASCII value with the NUL terminator stripped.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        if entry.field_type != Some(FieldType::Ascii) {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected ASCII, got type {}", entry.field_type_raw),
            });
        }
        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

fn unsigned_type(entry: &IfdEntry) -> Result<FieldType, TiffError> {
    let field_type = entry
        .field_type
        .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
    if !field_type.is_unsigned_integer() {
        return Err(TiffError::InvalidTagValue {
            tag: tag_name(entry),
            message: format!("expected unsigned integers, got {field_type:?}"),
        });
    }
    Ok(field_type)
}

fn tag_name(entry: &IfdEntry) -> &'static str {
    entry.tag().map(|t| t.name()).unwrap_or("unknown")
}

// =============================================================================
// Tests
// =============================================================================

//! Byte-range I/O.
//!
//! Every tile source that reads a container format goes through
//! [`RangeReader`], so the same parser works on an in-memory buffer, a local
//! file or a remote URL. [`BlockCache`] wraps any reader to coalesce the many
//! small reads a directory walk produces.

mod block_cache;
mod file_reader;
mod http_reader;
mod range_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use file_reader::FileRangeReader;
pub use http_reader::{fetch_bytes, HttpRangeReader};
pub use range_reader::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le,
    MemoryRangeReader, RangeReader,
};

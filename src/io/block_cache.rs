use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Default block size: 64KB.
///
/// A classic TIFF directory plus its tile tables usually fits in one or two
/// blocks, while a single compressed 256x256 tile spans a handful.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default number of cached blocks per reader (4MB at the default block size).
pub const DEFAULT_BLOCK_CAPACITY: usize = 64;

/// Fixed-size block cache in front of any [`RangeReader`].
///
/// Parsing a TIFF issues many small scattered reads (header, directory
/// entries, out-of-line tag values). Over HTTP each of those would be a
/// round trip; this wrapper rounds them out to whole blocks and keeps the
/// most recently used blocks around.
///
/// Concurrent misses on the same block share a single fetch.
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    blocks: Mutex<LruCache<u64, Bytes>>,
    pending: Mutex<HashMap<u64, Arc<Notify>>>,
}

impl<R: RangeReader> BlockCache<R> {
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY)
    }

    /// Creates a cache of `capacity` blocks of `block_size` bytes.
    ///
    /// Zero values are raised to one.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            blocks: Mutex::new(LruCache::new(capacity)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks currently held.
    pub async fn cached_blocks(&self) -> usize {
        self.blocks.lock().await.len()
    }

    async fn block(&self, index: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = self.blocks.lock().await.get(&index) {
                return Ok(data.clone());
            }

            let leader = {
                let mut pending = self.pending.lock().await;
                match pending.get(&index) {
                    Some(waiter) => {
                        let waiter = waiter.clone();
                        // Register interest before releasing the map so a
                        // notify_waiters between the two cannot be missed.
                        let notified = waiter.notified();
                        tokio::pin!(notified);
                        notified.as_mut().enable();
                        drop(pending);
                        notified.await;
                        continue;
                    }
                    None => {
                        let notify = Arc::new(Notify::new());
                        pending.insert(index, notify.clone());
                        notify
                    }
                }
            };

            let fetched = self.fetch(index).await;

            if let Ok(data) = &fetched {
                self.blocks.lock().await.put(index, data.clone());
            }
            self.pending.lock().await.remove(&index);
            leader.notify_waiters();

            return fetched;
        }
    }

    async fn fetch(&self, index: u64) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        let start = index * self.block_size as u64;
        if start >= size {
            return Err(IoError::RangeOutOfBounds {
                offset: start,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = (size - start).min(self.block_size as u64) as usize;
        trace!(
            resource = self.inner.identifier(),
            block = index,
            len,
            "fetching block"
        );
        self.inner.read_exact_at(start, len).await
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.inner.size())?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let block_size = self.block_size as u64;
        let first = offset / block_size;
        let last = (offset + len as u64 - 1) / block_size;
        let skip = (offset % block_size) as usize;

        if first == last {
            let block = self.block(first).await?;
            return Ok(block.slice(skip..skip + len));
        }

        let mut out = BytesMut::with_capacity(len);
        for index in first..=last {
            let block = self.block(index).await?;
            let from = if index == first { skip } else { 0 };
            let take = (block.len() - from).min(len - out.len());
            out.extend_from_slice(&block[from..from + take]);
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

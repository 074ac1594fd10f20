use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// HTTP(S) implementation of [`RangeReader`].
///
/// The resource size is resolved once on creation: a HEAD request first,
/// falling back to a one-byte ranged GET for servers that omit
/// `Content-Length` on HEAD. Every read is a single `Range: bytes=a-b` GET.
#[derive(Debug, Clone)]
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
}

impl HttpRangeReader {
    /// Open `url` with a fresh client.
    pub async fn open(url: impl Into<String>) -> Result<Self, IoError> {
        Self::new(Client::new(), url).await
    }

    /// Open `url` using an existing client (connection pool shared with other sources).
    pub async fn new(client: Client, url: impl Into<String>) -> Result<Self, IoError> {
        let url = url.into();
        let size = resolve_size(&client, &url).await?;
        debug!(url = %url, size, "opened HTTP range reader");
        Ok(Self { client, url, size })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

async fn resolve_size(client: &Client, url: &str) -> Result<u64, IoError> {
    let head = client.head(url).send().await?;
    check_status(head.status(), url)?;

    if let Some(len) = head
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|&len| len > 0)
    {
        return Ok(len);
    }

    let probe = client.get(url).header(RANGE, "bytes=0-0").send().await?;
    check_status(probe.status(), url)?;
    probe
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
        .ok_or_else(|| IoError::Http(format!("{url}: server did not report a content length")))
}

fn check_status(status: StatusCode, url: &str) -> Result<(), IoError> {
    if status == StatusCode::NOT_FOUND {
        return Err(IoError::NotFound(url.to_string()));
    }
    if !status.is_success() {
        return Err(IoError::Http(format!("{url}: unexpected status {status}")));
    }
    Ok(())
}

/// Fetches a whole resource with a plain GET.
///
/// Used for small remote objects such as individual tiles and descriptors.
pub async fn fetch_bytes(client: &Client, url: &str, headers: &HeaderMap) -> Result<Bytes, IoError> {
    let resp = client.get(url).headers(headers.clone()).send().await?;
    check_status(resp.status(), url)?;
    Ok(resp.bytes().await?)
}

/// Extracts the total length from `bytes 0-0/12345`.
pub(crate) fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

#[async_trait]
impl RangeReader for HttpRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        // Inclusive on both ends
        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);
        let resp = self
            .client
            .get(&self.url)
            .header(RANGE, range)
            .send()
            .await?;
        check_status(resp.status(), &self.url)?;

        let full_body = resp.status() == StatusCode::OK;
        let body = resp.bytes().await?;

        // A server that ignores Range answers 200 with the whole resource
        let body = if full_body && body.len() as u64 == self.size {
            body.slice(offset as usize..offset as usize + len)
        } else {
            body
        };

        if body.len() != len {
            return Err(IoError::Http(format!(
                "{}: expected {} bytes at offset {}, got {}",
                self.url,
                len,
                offset,
                body.len()
            )));
        }
        Ok(body)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}

//! reqwest-backed implementation of the request adapter.

use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode, Url};
use tracing::debug;

use super::{url_file_name, BodyStream, BoxFuture, RequestAdapter};
use crate::error::{DownloadError, DownloadResult};

static SHARED_CLIENT: OnceLock<Client> = OnceLock::new();

/// Install a process-wide HTTP client for adapters created without an
/// explicit one.
///
/// Idempotent: the first call wins, later calls (and any adapter already
/// created) keep the installed client. Returns whether this call installed
/// the client. Hosts with their own transport tuning should call this once
/// at startup, before the first download.
pub fn init_transport(client: Client) -> bool {
    SHARED_CLIENT.set(client).is_ok()
}

/// Shared client with connection-manager defaults suited to many
/// concurrent ranged requests against one host.
fn shared_client() -> &'static Client {
    SHARED_CLIENT.get_or_init(|| {
        Client::builder()
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("rangepull/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client")
    })
}

/// Ranged HTTP(S) access to one remote resource.
pub struct HttpRequestAdapter {
    url: Url,
    client: Client,
}

impl HttpRequestAdapter {
    /// Create an adapter for `address` using the process-wide client.
    pub fn new(address: &str) -> DownloadResult<Self> {
        let url = Url::parse(address)
            .map_err(|e| DownloadError::InvalidAddress(format!("{address}: {e}")))?;
        Ok(Self {
            url,
            client: shared_client().clone(),
        })
    }

    /// Create an adapter with a caller-supplied client.
    pub fn with_client(address: &str, client: Client) -> DownloadResult<Self> {
        let url = Url::parse(address)
            .map_err(|e| DownloadError::InvalidAddress(format!("{address}: {e}")))?;
        Ok(Self { url, client })
    }

    /// Probe the size with a one-byte ranged GET when HEAD gave nothing.
    async fn probe_size_via_range(&self) -> DownloadResult<u64> {
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        let total = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .unwrap_or(0);
        Ok(total)
    }
}

impl RequestAdapter for HttpRequestAdapter {
    fn address(&self) -> &Url {
        &self.url
    }

    fn file_size(&self) -> BoxFuture<'_, DownloadResult<u64>> {
        Box::pin(async move {
            let response = self.client.head(self.url.clone()).send().await?;

            let from_head = response
                .status()
                .is_success()
                .then(|| {
                    response
                        .headers()
                        .get(CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                })
                .flatten();

            match from_head {
                Some(size) => Ok(size),
                None => {
                    debug!(url = %self.url, "HEAD gave no content length, probing with ranged GET");
                    self.probe_size_via_range().await
                }
            }
        })
    }

    fn content_disposition_filename(&self) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let response = self.client.head(self.url.clone()).send().await.ok()?;
            response
                .headers()
                .get(CONTENT_DISPOSITION)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_disposition_filename)
        })
    }

    fn file_name(&self) -> String {
        url_file_name(&self.url).unwrap_or_default()
    }

    fn open_range(&self, start: u64, end: u64) -> BoxFuture<'_, DownloadResult<BodyStream>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.url.clone())
                .header(RANGE, format!("bytes={start}-{end}"))
                .send()
                .await?;

            // Anything but 206 means the server served something other
            // than the requested window; treating 200 as "close enough"
            // would interleave whole-file bodies into chunk storage.
            if response.status() != StatusCode::PARTIAL_CONTENT {
                return Err(DownloadError::RangeNotSupported {
                    status: response.status().as_u16(),
                });
            }

            let stream = response
                .bytes_stream()
                .map(|item| item.map_err(DownloadError::from));
            Ok(Box::pin(stream) as BodyStream)
        })
    }
}

/// Total size out of a `Content-Range: bytes 0-0/1234` header.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.trim().parse().ok()
}

/// File name out of a `Content-Disposition` header value.
///
/// Handles the plain `filename=` form and the `filename*=charset''value`
/// form, preferring the plain one. Surrounding quotes are stripped.
fn parse_disposition_filename(value: &str) -> Option<String> {
    let mut extended = None;
    for part in value.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename=") {
            let name = rest.trim_matches('"').trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        } else if let Some(rest) = part.strip_prefix("filename*=") {
            let name = rest.rsplit("''").next().unwrap_or(rest).trim_matches('"');
            if !name.is_empty() {
                extended = Some(name.to_string());
            }
        }
    }
    extended
}

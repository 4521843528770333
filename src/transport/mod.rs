//! Abstract HTTP transport for the download engine.
//!
//! The engine never talks to a socket directly; it consumes a
//! [`RequestAdapter`], which yields the resource size, a suggested file
//! name and ranged byte streams. The crate ships a reqwest-backed
//! implementation ([`HttpRequestAdapter`]); tests inject scripted
//! adapters through the same trait.

mod http;

pub use http::{init_transport, HttpRequestAdapter};

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use reqwest::Url;

use crate::error::DownloadResult;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stream of body bytes for one ranged response.
pub type BodyStream = Pin<Box<dyn Stream<Item = DownloadResult<Bytes>> + Send>>;

/// Source of ranged byte streams for a single remote resource.
///
/// Implementations must honour `Range: bytes=start-end` exactly; a
/// response that ignores the range is a fatal error, not a fallback.
pub trait RequestAdapter: Send + Sync {
    /// Resolved absolute address of the resource.
    fn address(&self) -> &Url;

    /// Total size of the resource in bytes, 0 when the server does not
    /// report one.
    fn file_size(&self) -> BoxFuture<'_, DownloadResult<u64>>;

    /// File name suggested by a `Content-Disposition` header, if any.
    fn content_disposition_filename(&self) -> BoxFuture<'_, Option<String>>;

    /// File name derived from the URL path (last segment).
    fn file_name(&self) -> String;

    /// Open a stream over `[start, end]` (both inclusive).
    fn open_range(&self, start: u64, end: u64) -> BoxFuture<'_, DownloadResult<BodyStream>>;
}

/// Last path segment of a URL, ignoring query and fragment.
pub(crate) fn url_file_name(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

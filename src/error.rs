//! Error types for the download engine.

use std::io;

use thiserror::Error;

/// Result type for download operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Errors that can occur while downloading a resource.
///
/// Transport-level failures are retried per chunk up to the configured
/// failover budget; everything else aborts the download. The split is
/// encoded in [`DownloadError::is_transient`].
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The remote resource reported a zero or unknown size.
    #[error("remote resource reported no usable size")]
    InvalidResource,

    /// A drive involved in the download does not have room for the payload.
    #[error("insufficient disk space on {mount}: need {required} bytes, {available} available")]
    InsufficientDiskSpace {
        mount: String,
        required: u64,
        available: u64,
    },

    /// The address could not be parsed into an absolute URL.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Socket reset, TLS hiccup, connection refused mid-stream and friends.
    /// Recovered inside the chunk fetcher up to the failover budget.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server answered a ranged request without `206 Partial Content`.
    #[error("range request was not honoured (HTTP {status})")]
    RangeNotSupported { status: u16 },

    /// A single read stalled past the configured deadline. Retried without
    /// consuming the failover budget.
    #[error("read stalled past the configured deadline")]
    ReadTimeout,

    /// The response body ended before the requested range was filled.
    #[error("response body ended early: got {received} of {expected} bytes")]
    IncompleteBody { received: u64, expected: u64 },

    /// The per-chunk failover budget ran out.
    #[error("retries exhausted after {attempts} failovers: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<DownloadError>,
    },

    /// The download was asked to stop.
    #[error("download was cancelled")]
    Cancelled,

    /// A second download was started on a downloader that is still busy.
    #[error("another download is already in progress")]
    Busy,

    /// A chunk worker task crashed.
    #[error("download worker crashed: {0}")]
    WorkerPanic(String),

    /// File system error while touching chunk storage or the destination.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DownloadError {
    /// Whether the error is on the retry allow-list.
    ///
    /// Only transport-level failures qualify; read timeouts are handled
    /// separately (they retry without touching the failover budget).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

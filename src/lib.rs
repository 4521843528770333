//! rangepull - multi-connection HTTP(S) file downloader.
//!
//! Transfers a single remote resource into a single local file by
//! splitting its byte range into contiguous chunks fetched over parallel
//! (or serial) ranged requests, with per-chunk bandwidth throttling,
//! bounded retries with progress checkpoints, and a final in-order merge.
//!
//! # Architecture
//!
//! ```text
//! FileDownloader (orchestrator)
//!         │  pre-flight: size probe, option clamping, disk space,
//!         │              stale destination removal, chunk plan
//!         │
//!         ├── ChunkFetcher ── one per chunk ──► RequestAdapter (ranged GET)
//!         │        │                                │
//!         │        │◄── ThrottledReader ◄── body stream
//!         │        ▼
//!         │   Chunk storage (in-memory buffer │ on-disk temp file)
//!         │
//!         ├── ProgressAggregator ──► observer callbacks
//!         │
//!         └── merge: append chunks in start order into the destination
//! ```
//!
//! # Example
//!
//! ```ignore
//! use rangepull::{DownloadOptions, FileDownloader};
//!
//! let options = DownloadOptions {
//!     chunk_count: 8,
//!     parallel_download: true,
//!     ..DownloadOptions::default()
//! };
//! let mut downloader = FileDownloader::new(options);
//! downloader.on_progress(|event| println!("{event:?}"));
//!
//! let package = downloader
//!     .download_file("https://example.com/large.iso", "/tmp/large.iso")
//!     .await?;
//! ```

pub mod chunk;
mod disk;
pub mod error;
mod fetcher;
mod merge;
pub mod options;
mod orchestrator;
pub mod package;
pub mod progress;
pub mod throttle;
pub mod transport;

pub use error::{DownloadError, DownloadResult};
pub use options::DownloadOptions;
pub use orchestrator::FileDownloader;
pub use package::DownloadPackage;
pub use progress::{DownloadEvent, ProgressObserver};
pub use transport::{init_transport, HttpRequestAdapter, RequestAdapter};

// The engine's address type; re-exported so hosts do not need to pin a
// matching url crate version themselves.
pub use reqwest::Url;

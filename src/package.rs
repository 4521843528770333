//! Aggregate state of one download.

use std::path::PathBuf;

use reqwest::Url;

use crate::chunk::Chunk;

/// Everything the engine knows about one download: where it comes from,
/// where it goes, and how far each chunk has come.
///
/// A package is created when a download starts and stays valid afterwards;
/// after a cancellation it still holds the chunk cursors and temp-file
/// paths, so handing it back to the downloader resumes in place.
#[derive(Debug)]
pub struct DownloadPackage {
    /// Resolved absolute address of the resource.
    pub address: Url,
    /// Final destination file.
    pub destination: PathBuf,
    /// Total size in bytes, filled in by pre-flight.
    pub total_size: u64,
    /// The chunk plan with per-chunk progress.
    pub chunks: Vec<Chunk>,
    /// Bytes stored across all chunks, synced from the chunk cursors.
    pub bytes_received: u64,
}

impl DownloadPackage {
    pub fn new(address: Url, destination: impl Into<PathBuf>) -> Self {
        Self {
            address,
            destination: destination.into(),
            total_size: 0,
            chunks: Vec::new(),
            bytes_received: 0,
        }
    }

    /// Sum of the chunk cursors right now.
    pub fn received(&self) -> u64 {
        self.chunks.iter().map(Chunk::position).sum()
    }

    /// Refresh `bytes_received` from the chunk cursors.
    pub(crate) fn sync_received(&mut self) {
        self.bytes_received = self.received();
    }

    /// Whether every planned chunk is filled.
    pub fn is_complete(&self) -> bool {
        !self.chunks.is_empty() && self.chunks.iter().all(Chunk::is_filled)
    }

    /// Progress as a ratio in `[0, 1]`, 0 when the size is still unknown.
    pub fn progress_ratio(&self) -> f64 {
        if self.total_size == 0 {
            0.0
        } else {
            self.received() as f64 / self.total_size as f64
        }
    }

    /// Release all chunk storage: buffers are dropped, temp files deleted,
    /// and the chunk list cleared. Byte totals stay for reporting.
    pub async fn clear(&mut self) {
        self.sync_received();
        for chunk in &mut self.chunks {
            chunk.release_storage().await;
        }
        self.chunks.clear();
    }
}

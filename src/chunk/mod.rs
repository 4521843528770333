//! One contiguous byte range of the remote resource and its partial data.
//!
//! A [`Chunk`] tracks the absolute window `[start, end]` (both inclusive),
//! the progress cursor within it, and the failover accounting used by the
//! fetcher's retry state machine. Partial data lives either in a lazily
//! allocated in-memory buffer or in a private append-only temp file,
//! depending on the selected backend.

mod planner;

pub use planner::{clamp_chunk_count, plan_chunks, MAX_CHUNK_LEN};

use std::path::{Path, PathBuf};

use tokio::fs;
use uuid::Uuid;

use crate::error::DownloadResult;

/// Identifier of a chunk, stable for the lifetime of a download.
pub type ChunkId = u32;

/// Where a chunk keeps its partial data.
#[derive(Debug)]
pub enum ChunkStorage {
    /// In-memory buffer of exactly `length` bytes, allocated on first write.
    Memory { data: Option<Vec<u8>> },
    /// Private temp file holding exactly `position` bytes appended in order.
    Disk { path: Option<PathBuf> },
}

/// State of one byte range: bounds, cursor, failover counters, storage.
///
/// While a fetch is in flight the chunk is owned exclusively by one fetcher
/// task; nothing else mutates `position` or the storage.
#[derive(Debug)]
pub struct Chunk {
    pub(crate) id: ChunkId,
    pub(crate) start: u64,
    pub(crate) end: u64,
    pub(crate) position: u64,
    pub(crate) failover_count: u32,
    pub(crate) max_failover: u32,
    pub(crate) position_checkpoint: u64,
    pub(crate) storage: ChunkStorage,
}

impl Chunk {
    pub(crate) fn new(
        id: ChunkId,
        start: u64,
        end: u64,
        max_failover: u32,
        storage: ChunkStorage,
    ) -> Self {
        debug_assert!(start <= end);
        Self {
            id,
            start,
            end,
            position: 0,
            failover_count: 0,
            max_failover,
            position_checkpoint: 0,
            storage,
        }
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// First absolute offset of the window.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last absolute offset of the window (inclusive).
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Total bytes this chunk is responsible for.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Bytes already written into this chunk.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes still missing.
    pub fn remaining(&self) -> u64 {
        self.length() - self.position
    }

    /// Retries already consumed by transport failures.
    pub fn failover_count(&self) -> u32 {
        self.failover_count
    }

    /// Whether the cursor reached the end of the window.
    pub fn is_filled(&self) -> bool {
        self.position == self.length()
    }

    /// Path of the on-disk backing file, when that backend is active and a
    /// file has been allocated.
    pub fn temp_path(&self) -> Option<&Path> {
        match &self.storage {
            ChunkStorage::Disk { path } => path.as_deref(),
            ChunkStorage::Memory { .. } => None,
        }
    }

    /// Bytes the backing store currently holds, or `None` when no store has
    /// been allocated (or the temp file vanished underneath us).
    pub(crate) async fn stored_len(&self) -> DownloadResult<Option<u64>> {
        match &self.storage {
            ChunkStorage::Memory { data } => Ok(data.as_ref().map(|d| d.len() as u64)),
            ChunkStorage::Disk { path } => match path {
                None => Ok(None),
                Some(p) => match fs::metadata(p).await {
                    Ok(meta) => Ok(Some(meta.len())),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                },
            },
        }
    }

    /// Drop the cursor back to zero after inconsistent leftover state
    /// (progress recorded but no backing store to show for it).
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.position_checkpoint = 0;
        if let ChunkStorage::Memory { data } = &mut self.storage {
            *data = None;
        }
    }

    /// Buffer for the in-memory backend, allocated to exactly `length` on
    /// first use. Panics if called on a disk-backed chunk; the fetcher
    /// dispatches on the backend before touching storage.
    pub(crate) fn ensure_buffer(&mut self) -> &mut Vec<u8> {
        let length = self.length() as usize;
        match &mut self.storage {
            ChunkStorage::Memory { data } => data.get_or_insert_with(|| vec![0u8; length]),
            ChunkStorage::Disk { .. } => unreachable!("memory write on disk-backed chunk"),
        }
    }

    /// Copy `bytes` into the in-memory buffer at the cursor and advance it.
    pub(crate) fn fill(&mut self, bytes: &[u8]) {
        let at = self.position as usize;
        let buffer = self.ensure_buffer();
        buffer[at..at + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len() as u64;
    }

    /// Advance the cursor after a successful append to the temp file.
    pub(crate) fn advance(&mut self, n: u64) {
        self.position += n;
    }

    /// Path for the on-disk backend, allocating a fresh
    /// `<32-hex-uuid><extension>` file under `dir` when none exists yet
    /// (or the previous one is gone).
    pub(crate) async fn ensure_temp_file(
        &mut self,
        dir: &Path,
        extension: &str,
    ) -> DownloadResult<PathBuf> {
        let ChunkStorage::Disk { path } = &mut self.storage else {
            unreachable!("temp file requested for in-memory chunk");
        };

        if let Some(existing) = path.as_ref() {
            if fs::try_exists(existing).await? {
                return Ok(existing.clone());
            }
        }

        let name = format!("{}{}", Uuid::new_v4().simple(), extension);
        let fresh = dir.join(name);
        fs::create_dir_all(dir).await?;
        fs::File::create(&fresh).await?;
        *path = Some(fresh.clone());
        Ok(fresh)
    }

    /// Release the backing store: drop the buffer, delete the temp file.
    pub(crate) async fn release_storage(&mut self) {
        match &mut self.storage {
            ChunkStorage::Memory { data } => *data = None,
            ChunkStorage::Disk { path } => {
                if let Some(p) = path.take() {
                    if let Err(e) = fs::remove_file(&p).await {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!(error = %e, path = %p.display(), "failed to remove chunk temp file");
                        }
                    }
                }
            }
        }
    }
}

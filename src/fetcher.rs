//! Drives a single chunk to completion.
//!
//! A fetch issues a ranged request for the unfinished tail of the chunk,
//! streams the body through the throttled reader into the chunk's backing
//! store, and reports every stored read to the progress aggregator. On a
//! transport failure it checkpoints the cursor and retries with backoff,
//! up to the chunk's failover budget; a read that merely times out is
//! reissued without touching the budget. Cancellation is honoured at every
//! suspension point.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chunk::Chunk;
use crate::error::{DownloadError, DownloadResult};
use crate::options::DownloadOptions;
use crate::progress::ProgressAggregator;
use crate::throttle::ThrottledReader;
use crate::transport::RequestAdapter;

/// Extra read-deadline room granted whenever a failover made no forward
/// progress since the previous checkpoint.
const NO_PROGRESS_TIMEOUT_STEP: Duration = Duration::from_millis(200);

/// Terminal states of a chunk fetch that are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchOutcome {
    Completed,
    Cancelled,
}

/// Fetches chunks for one download.
///
/// The fetcher itself is stateless across chunks and cheap to clone; the
/// chunk being fetched is owned exclusively by the calling task.
#[derive(Clone)]
pub(crate) struct ChunkFetcher {
    adapter: Arc<dyn RequestAdapter>,
    options: Arc<DownloadOptions>,
    progress: Arc<ProgressAggregator>,
    cancel: CancellationToken,
}

impl ChunkFetcher {
    pub(crate) fn new(
        adapter: Arc<dyn RequestAdapter>,
        options: Arc<DownloadOptions>,
        progress: Arc<ProgressAggregator>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            options,
            progress,
            cancel,
        }
    }

    /// Drive `chunk` until it is filled, cancelled, or failed for good.
    pub(crate) async fn fetch(&self, chunk: &mut Chunk) -> DownloadResult<FetchOutcome> {
        // Escalates per failover that made no progress; deliberately local
        // to this chunk's fetch rather than shared configuration.
        let mut read_timeout = self.options.timeout;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(FetchOutcome::Cancelled);
            }

            match chunk.stored_len().await? {
                Some(stored) if chunk.is_filled() && stored == chunk.length() => {
                    return Ok(FetchOutcome::Completed);
                }
                None if chunk.position() > 0 => {
                    debug!(
                        chunk = chunk.id(),
                        position = chunk.position(),
                        "progress recorded without backing store, restarting chunk"
                    );
                    chunk.reset();
                }
                _ => {}
            }

            match self.fetch_once(chunk, read_timeout).await {
                Ok(()) => return Ok(FetchOutcome::Completed),
                Err(DownloadError::Cancelled) => return Ok(FetchOutcome::Cancelled),
                Err(DownloadError::ReadTimeout) => {
                    // A continuation, not a failover: reissue the range
                    // request from the current cursor.
                    debug!(
                        chunk = chunk.id(),
                        position = chunk.position(),
                        "read deadline hit, reissuing range request"
                    );
                }
                Err(e) if e.is_transient() => {
                    if chunk.failover_count >= chunk.max_failover {
                        return Err(DownloadError::RetriesExhausted {
                            attempts: chunk.failover_count,
                            source: Box::new(e),
                        });
                    }

                    let advanced = chunk.position > chunk.position_checkpoint;
                    chunk.position_checkpoint = chunk.position;
                    chunk.failover_count += 1;
                    if !advanced {
                        read_timeout += NO_PROGRESS_TIMEOUT_STEP;
                    }

                    warn!(
                        chunk = chunk.id(),
                        attempt = chunk.failover_count,
                        budget = chunk.max_failover,
                        backoff_ms = read_timeout.as_millis() as u64,
                        error = %e,
                        "transient transport failure, backing off"
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(FetchOutcome::Cancelled),
                        _ = sleep(read_timeout) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One attempt: open the range at the cursor and stream it in.
    async fn fetch_once(&self, chunk: &mut Chunk, read_timeout: Duration) -> DownloadResult<()> {
        let from = chunk.start() + chunk.position();
        let stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            opened = self.adapter.open_range(from, chunk.end()) => opened?,
        };
        let mut reader = ThrottledReader::new(stream, self.options.max_speed_per_chunk);

        if self.options.on_the_fly_download {
            self.read_into_memory(chunk, &mut reader, read_timeout).await
        } else {
            self.read_into_temp_file(chunk, &mut reader, read_timeout)
                .await
        }
    }

    async fn read_into_memory(
        &self,
        chunk: &mut Chunk,
        reader: &mut ThrottledReader,
        read_timeout: Duration,
    ) -> DownloadResult<()> {
        chunk.ensure_buffer();

        while !chunk.is_filled() {
            let Some(bytes) = self.next_block(chunk, reader, read_timeout).await? else {
                continue;
            };
            chunk.fill(&bytes);
            self.progress
                .record_read(chunk.id(), chunk.length(), chunk.position(), bytes.len() as u64);
        }
        Ok(())
    }

    async fn read_into_temp_file(
        &self,
        chunk: &mut Chunk,
        reader: &mut ThrottledReader,
        read_timeout: Duration,
    ) -> DownloadResult<()> {
        let path = chunk
            .ensure_temp_file(&self.options.temp_directory, &self.options.temp_file_extension)
            .await?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await?;

        // A torn append from an attempt that died between write and
        // checkpoint may have left bytes past the cursor; drop them so the
        // file holds exactly `position` bytes again.
        if file.metadata().await?.len() > chunk.position() {
            file.set_len(chunk.position()).await?;
        }

        while !chunk.is_filled() {
            let Some(bytes) = self.next_block(chunk, reader, read_timeout).await? else {
                continue;
            };
            // The cursor only moves once the bytes are known to be on disk;
            // a checkpointed retry must never replay data it does not have.
            file.write_all(&bytes).await?;
            file.flush().await?;
            chunk.advance(bytes.len() as u64);
            self.progress
                .record_read(chunk.id(), chunk.length(), chunk.position(), bytes.len() as u64);
        }
        Ok(())
    }

    /// Next block of at most `buffer_block_size` bytes, clipped to what the
    /// chunk still needs. `Ok(None)` is an empty stream item to skip over.
    async fn next_block(
        &self,
        chunk: &Chunk,
        reader: &mut ThrottledReader,
        read_timeout: Duration,
    ) -> DownloadResult<Option<bytes::Bytes>> {
        let want = (self.options.buffer_block_size as u64).min(chunk.remaining()) as usize;

        let item = tokio::select! {
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            item = reader.read(want, read_timeout) => item,
        };

        match item {
            None => Err(DownloadError::IncompleteBody {
                received: chunk.position(),
                expected: chunk.length(),
            }),
            Some(Err(e)) => Err(e),
            Some(Ok(bytes)) if bytes.is_empty() => Ok(None),
            Some(Ok(bytes)) => Ok(Some(bytes)),
        }
    }
}

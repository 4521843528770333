//! Bandwidth-limited reads over a response body stream.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::time::{timeout, Instant};

use crate::error::{DownloadError, DownloadResult};
use crate::transport::BodyStream;

/// Wraps a body stream and bounds its read rate by sleeping.
///
/// The reader tracks bytes delivered since creation; whenever the
/// instantaneous rate would exceed the target, [`ThrottledReader::read`]
/// suspends for exactly the shortfall before handing the data out. A limit
/// of 0 bypasses pacing entirely. No data is ever dropped: stream items
/// larger than the requested read size are carried over to the next call.
pub struct ThrottledReader {
    stream: BodyStream,
    pending: Bytes,
    limit: u64,
    started: Instant,
    transferred: u64,
}

impl ThrottledReader {
    /// Wrap `stream` with a target rate of `limit` bytes per second.
    pub fn new(stream: BodyStream, limit: u64) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
            limit,
            started: Instant::now(),
            transferred: 0,
        }
    }

    /// Pull up to `max` bytes from the stream.
    ///
    /// `read_timeout` bounds only the wait for the wire; pacing sleeps run
    /// outside it, so a tight bandwidth cap cannot masquerade as a stalled
    /// connection. Returns `None` at end of stream,
    /// `Some(Err(ReadTimeout))` when the deadline elapses.
    pub async fn read(
        &mut self,
        max: usize,
        read_timeout: Duration,
    ) -> Option<DownloadResult<Bytes>> {
        debug_assert!(max > 0);

        let chunk = if !self.pending.is_empty() {
            let take = max.min(self.pending.len());
            self.pending.split_to(take)
        } else {
            let mut bytes = match timeout(read_timeout, self.stream.next()).await {
                Err(_) => return Some(Err(DownloadError::ReadTimeout)),
                Ok(None) => return None,
                Ok(Some(Err(e))) => return Some(Err(e)),
                Ok(Some(Ok(bytes))) => bytes,
            };
            if bytes.len() > max {
                self.pending = bytes.split_off(max);
            }
            bytes
        };

        self.pace(chunk.len() as u64).await;
        Some(Ok(chunk))
    }

    /// Sleep long enough that `transferred / elapsed` stays at or under the
    /// limit.
    async fn pace(&mut self, n: u64) {
        if self.limit == 0 || n == 0 {
            return;
        }
        self.transferred += n;
        let target = Duration::from_secs_f64(self.transferred as f64 / self.limit as f64);
        let elapsed = self.started.elapsed();
        if target > elapsed {
            tokio::time::sleep(target - elapsed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn body_of(items: Vec<Vec<u8>>) -> BodyStream {
        Box::pin(stream::iter(
            items.into_iter().map(|v| Ok(Bytes::from(v))),
        ))
    }

    async fn drain(reader: &mut ThrottledReader, max: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(item) = reader.read(max, Duration::from_secs(5)).await {
            out.extend_from_slice(&item.unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_reader_does_not_sleep() {
        let mut reader = ThrottledReader::new(body_of(vec![vec![7u8; 4096]; 4]), 0);
        let begun = Instant::now();

        let out = drain(&mut reader, 1024).await;

        assert_eq!(out.len(), 4 * 4096);
        assert_eq!(begun.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_is_bounded() {
        // 4 KiB at 4 KiB/s must take at least a second of (virtual) time.
        let mut reader = ThrottledReader::new(body_of(vec![vec![1u8; 1024]; 4]), 4096);
        let begun = Instant::now();

        let out = drain(&mut reader, 1024).await;

        assert_eq!(out.len(), 4096);
        assert!(begun.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_items_are_carried_over() {
        let payload: Vec<u8> = (0u8..100).collect();
        let mut reader = ThrottledReader::new(body_of(vec![payload.clone()]), 0);

        let mut sizes = Vec::new();
        let mut out = Vec::new();
        while let Some(item) = reader.read(30, Duration::from_secs(1)).await {
            let bytes = item.unwrap();
            sizes.push(bytes.len());
            out.extend_from_slice(&bytes);
        }

        assert_eq!(sizes, vec![30, 30, 30, 10]);
        assert_eq!(out, payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stream_times_out() {
        let stalled: BodyStream = Box::pin(stream::pending());
        let mut reader = ThrottledReader::new(stalled, 0);

        let result = reader.read(1024, Duration::from_millis(50)).await;

        assert!(matches!(result, Some(Err(DownloadError::ReadTimeout))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_error_is_passed_through() {
        let failing: BodyStream = Box::pin(stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(DownloadError::Transport("reset".into())),
        ]));
        let mut reader = ThrottledReader::new(failing, 0);

        let first = reader.read(16, Duration::from_secs(1)).await;
        assert_eq!(first.unwrap().unwrap().as_ref(), b"ok");

        let second = reader.read(16, Duration::from_secs(1)).await;
        assert!(matches!(second, Some(Err(DownloadError::Transport(_)))));
    }
}

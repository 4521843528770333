//! Progress events and aggregate speed accounting.
//!
//! Fetchers report every successful read; the aggregator keeps the shared
//! byte counter, derives an overall bytes-per-second figure at a >= 1 s
//! sampling cadence, and fans events out to registered observers.
//! Per-chunk events are never rate limited.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use crate::chunk::ChunkId;

/// Callback invoked for every download event.
///
/// Observers run on the fetcher tasks and must tolerate high-frequency
/// calls; anything heavy belongs behind a channel on the observer's side.
pub type ProgressObserver = Arc<dyn Fn(&DownloadEvent) + Send + Sync>;

/// Events emitted over the lifetime of one download.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// One chunk advanced. `speed` is the last sampled overall rate.
    ChunkProgress {
        chunk_id: ChunkId,
        length: u64,
        position: u64,
        speed: u64,
    },
    /// The aggregate byte counter advanced.
    OverallProgress {
        total_size: u64,
        bytes_received: u64,
        speed: u64,
    },
    /// The download finished. Emitted exactly once per download: on
    /// success (`cancelled` false, no error), cancellation (`cancelled`
    /// true, no error) or fatal failure (the error text).
    Completed {
        cancelled: bool,
        error: Option<String>,
        bytes_received: u64,
        total_size: u64,
    },
}

struct SpeedSample {
    total_at_sample: u64,
    tick: Instant,
    speed: u64,
}

/// Shared progress state for one running download.
pub(crate) struct ProgressAggregator {
    total_size: u64,
    bytes_received: AtomicU64,
    sample: Mutex<SpeedSample>,
    observers: Vec<ProgressObserver>,
}

impl ProgressAggregator {
    /// `initial_received` seeds the counter when a partially fetched
    /// package is resumed in-process.
    pub(crate) fn new(
        total_size: u64,
        initial_received: u64,
        observers: Vec<ProgressObserver>,
    ) -> Self {
        Self {
            total_size,
            bytes_received: AtomicU64::new(initial_received),
            sample: Mutex::new(SpeedSample {
                total_at_sample: initial_received,
                tick: Instant::now(),
                speed: 0,
            }),
            observers,
        }
    }

    pub(crate) fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::SeqCst)
    }

    /// Account for `n` freshly stored bytes of `chunk_id` and emit the
    /// per-chunk and aggregate events.
    pub(crate) fn record_read(&self, chunk_id: ChunkId, length: u64, position: u64, n: u64) {
        let received = self.bytes_received.fetch_add(n, Ordering::SeqCst) + n;
        let speed = self.sample_speed(received);

        self.emit(&DownloadEvent::ChunkProgress {
            chunk_id,
            length,
            position,
            speed,
        });
        self.emit(&DownloadEvent::OverallProgress {
            total_size: self.total_size,
            bytes_received: received,
            speed,
        });
    }

    /// Roll the speed sample when at least a second has passed; otherwise
    /// report the last known value.
    fn sample_speed(&self, received: u64) -> u64 {
        let mut sample = self.sample.lock().unwrap();
        let elapsed_ms = sample.tick.elapsed().as_millis() as u64 + 1;
        if elapsed_ms >= 1000 {
            // Another task may have rolled the sample with a higher total
            // between our fetch_add and this lock.
            let delta = received.saturating_sub(sample.total_at_sample);
            sample.speed = delta * 1000 / elapsed_ms;
            sample.total_at_sample = received;
            sample.tick = Instant::now();
        }
        sample.speed
    }

    pub(crate) fn emit(&self, event: &DownloadEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }
}

//! Download configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

/// Default number of chunks a resource is split into.
pub const DEFAULT_CHUNK_COUNT: u32 = 1;

/// Default size of a single read from the response body.
pub const DEFAULT_BUFFER_BLOCK_SIZE: usize = 8 * 1024;

/// Default per-read deadline; doubles as the retry backoff base.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default per-chunk retry ceiling for transport failures.
pub const DEFAULT_MAX_RETRIES_PER_CHUNK: u32 = 8;

/// Default suffix for on-disk chunk files.
pub const DEFAULT_TEMP_FILE_EXTENSION: &str = ".tmp";

/// Options controlling a single download.
///
/// All values are normalised by [`DownloadOptions::validated`] before the
/// engine uses them; the engine never mutates options afterwards (the
/// adaptive retry backoff is tracked per chunk task, not here).
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Desired number of chunks (coerced to >= 1). The planner raises this
    /// further when needed so no single chunk exceeds 2 GiB.
    pub chunk_count: u32,

    /// Fetch chunks concurrently when true, in plan order when false.
    pub parallel_download: bool,

    /// Buffer partial data in memory when true; spill each chunk to a
    /// private temp file when false.
    pub on_the_fly_download: bool,

    /// Per-chunk bandwidth cap in bytes per second. 0 means unlimited.
    pub max_speed_per_chunk: u64,

    /// Maximum bytes pulled from the body per read.
    pub buffer_block_size: usize,

    /// Per-read deadline. Also the base delay slept between failovers.
    pub timeout: Duration,

    /// How many transport failures a single chunk may survive.
    pub max_retries_per_chunk: u32,

    /// Directory that receives on-disk chunk files.
    pub temp_directory: PathBuf,

    /// Suffix appended to on-disk chunk file names.
    pub temp_file_extension: String,

    /// Release chunk storage once the destination file is assembled.
    pub clear_package_on_completion: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            chunk_count: DEFAULT_CHUNK_COUNT,
            parallel_download: false,
            on_the_fly_download: true,
            max_speed_per_chunk: 0,
            buffer_block_size: DEFAULT_BUFFER_BLOCK_SIZE,
            timeout: DEFAULT_TIMEOUT,
            max_retries_per_chunk: DEFAULT_MAX_RETRIES_PER_CHUNK,
            temp_directory: env::temp_dir(),
            temp_file_extension: DEFAULT_TEMP_FILE_EXTENSION.to_string(),
            clear_package_on_completion: true,
        }
    }
}

impl DownloadOptions {
    /// Normalise out-of-range values.
    ///
    /// Zero chunk counts, zero-sized read buffers and sub-millisecond
    /// deadlines are coerced to their minimum useful values rather than
    /// rejected.
    pub fn validated(mut self) -> Self {
        if self.chunk_count == 0 {
            debug!("chunk_count 0 coerced to 1");
            self.chunk_count = 1;
        }
        if self.buffer_block_size == 0 {
            debug!(
                default = DEFAULT_BUFFER_BLOCK_SIZE,
                "buffer_block_size 0 coerced to default"
            );
            self.buffer_block_size = DEFAULT_BUFFER_BLOCK_SIZE;
        }
        if self.timeout < Duration::from_millis(1) {
            self.timeout = Duration::from_millis(1);
        }
        if self.temp_directory.as_os_str().is_empty() {
            self.temp_directory = env::temp_dir();
        }
        self
    }
}

//! High-level download orchestration.
//!
//! [`FileDownloader`] owns the full pipeline: pre-flight (size probe,
//! option clamping, disk-space verification, stale-destination removal,
//! chunk plan), fetch execution (one tokio task per chunk, or strict plan
//! order when parallelism is off), and the final merge. Exactly one
//! [`DownloadEvent::Completed`] is emitted per download, whether it
//! succeeded, was cancelled, or failed.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::{clamp_chunk_count, plan_chunks};
use crate::disk;
use crate::error::{DownloadError, DownloadResult};
use crate::fetcher::{ChunkFetcher, FetchOutcome};
use crate::merge;
use crate::options::DownloadOptions;
use crate::package::DownloadPackage;
use crate::progress::{DownloadEvent, ProgressAggregator, ProgressObserver};
use crate::transport::{HttpRequestAdapter, RequestAdapter};

enum RunOutcome {
    Completed,
    Cancelled,
}

/// Downloads one remote resource into one local file over N ranged
/// connections.
///
/// Observers registered through [`FileDownloader::on_progress`] before the
/// download starts receive per-chunk progress, aggregate progress and the
/// final completion event. [`FileDownloader::cancel`] stops the download
/// in flight; on-disk chunk files are preserved so the same
/// [`DownloadPackage`] can be handed back in to resume.
pub struct FileDownloader {
    options: Arc<DownloadOptions>,
    observers: Vec<ProgressObserver>,
    cancel: Mutex<CancellationToken>,
    busy: AtomicBool,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl FileDownloader {
    pub fn new(options: DownloadOptions) -> Self {
        Self {
            options: Arc::new(options.validated()),
            observers: Vec::new(),
            cancel: Mutex::new(CancellationToken::new()),
            busy: AtomicBool::new(false),
        }
    }

    /// The normalised option set this downloader runs with.
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Whether a download is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Register an observer for progress and completion events.
    ///
    /// Must be called before the download starts; observers run on the
    /// fetcher tasks and should stay cheap.
    pub fn on_progress<F>(&mut self, observer: F)
    where
        F: Fn(&DownloadEvent) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
    }

    /// Ask the in-flight download to stop.
    ///
    /// Best-effort prompt: each fetcher notices at its next suspension
    /// point, bounded by one in-flight read or throttle sleep.
    pub fn cancel(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Download `address` into the file `destination`.
    pub async fn download_file(
        &self,
        address: &str,
        destination: impl Into<PathBuf>,
    ) -> DownloadResult<DownloadPackage> {
        let adapter = Arc::new(HttpRequestAdapter::new(address)?);
        self.download(adapter, destination).await
    }

    /// Download `address` into `folder`, deriving the file name from the
    /// `Content-Disposition` header when present, the URL path otherwise.
    /// The folder is created if missing.
    pub async fn download_to_folder(
        &self,
        address: &str,
        folder: impl Into<PathBuf>,
    ) -> DownloadResult<DownloadPackage> {
        let adapter: Arc<dyn RequestAdapter> = Arc::new(HttpRequestAdapter::new(address)?);
        let folder = folder.into();
        tokio::fs::create_dir_all(&folder).await?;
        let name = resolve_file_name(adapter.as_ref()).await;
        self.download(adapter, folder.join(name)).await
    }

    /// Download through a caller-supplied transport.
    pub async fn download(
        &self,
        adapter: Arc<dyn RequestAdapter>,
        destination: impl Into<PathBuf>,
    ) -> DownloadResult<DownloadPackage> {
        let mut package = DownloadPackage::new(adapter.address().clone(), destination);
        self.download_package(adapter, &mut package).await?;
        Ok(package)
    }

    /// Run (or resume) the download described by `package`.
    ///
    /// A package with planned chunks keeps them: chunks already filled are
    /// skipped, partially filled ones continue from their cursor. On
    /// cancellation this returns [`DownloadError::Cancelled`] and the
    /// package keeps its chunk state for a later call.
    pub async fn download_package(
        &self,
        adapter: Arc<dyn RequestAdapter>,
        package: &mut DownloadPackage,
    ) -> DownloadResult<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(DownloadError::Busy);
        }
        let _busy = BusyGuard(&self.busy);

        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap() = cancel.clone();

        info!(
            address = %package.address,
            destination = %package.destination.display(),
            "starting download"
        );

        let result = self.run(adapter, package, &cancel).await;
        package.sync_received();

        match result {
            Ok(RunOutcome::Completed) => {
                self.emit(&DownloadEvent::Completed {
                    cancelled: false,
                    error: None,
                    bytes_received: package.bytes_received,
                    total_size: package.total_size,
                });
                info!(
                    bytes = package.bytes_received,
                    destination = %package.destination.display(),
                    "download completed"
                );
                if self.options.clear_package_on_completion {
                    package.clear().await;
                }
                Ok(())
            }
            Ok(RunOutcome::Cancelled) => {
                // Temp files stay on disk so the package can resume.
                self.emit(&DownloadEvent::Completed {
                    cancelled: true,
                    error: None,
                    bytes_received: package.bytes_received,
                    total_size: package.total_size,
                });
                info!(bytes = package.bytes_received, "download cancelled");
                Err(DownloadError::Cancelled)
            }
            Err(e) => {
                self.emit(&DownloadEvent::Completed {
                    cancelled: false,
                    error: Some(e.to_string()),
                    bytes_received: package.bytes_received,
                    total_size: package.total_size,
                });
                warn!(error = %e, "download failed");
                if self.options.clear_package_on_completion {
                    package.clear().await;
                }
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        adapter: Arc<dyn RequestAdapter>,
        package: &mut DownloadPackage,
        cancel: &CancellationToken,
    ) -> DownloadResult<RunOutcome> {
        let total_size = tokio::select! {
            _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
            size = adapter.file_size() => size?,
        };
        if total_size == 0 {
            return Err(DownloadError::InvalidResource);
        }
        package.total_size = total_size;

        let temp_dir =
            (!self.options.on_the_fly_download).then(|| self.options.temp_directory.as_path());
        disk::ensure_capacity(&package.destination, temp_dir, total_size)?;

        if let Some(parent) = package.destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        match tokio::fs::remove_file(&package.destination).await {
            Ok(()) => debug!(path = %package.destination.display(), "removed stale destination file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if package.chunks.is_empty() {
            let parts = clamp_chunk_count(total_size, self.options.chunk_count);
            package.chunks = plan_chunks(
                total_size,
                parts,
                self.options.max_retries_per_chunk,
                self.options.on_the_fly_download,
            );
            info!(
                parts = package.chunks.len(),
                total_size,
                parallel = self.options.parallel_download,
                "planned chunks"
            );
        } else {
            debug!(
                parts = package.chunks.len(),
                received = package.received(),
                "resuming existing chunk plan"
            );
        }

        let aggregator = Arc::new(ProgressAggregator::new(
            total_size,
            package.received(),
            self.observers.clone(),
        ));
        let fetcher = ChunkFetcher::new(adapter, self.options.clone(), aggregator, cancel.clone());

        let outcome = if self.options.parallel_download {
            self.fetch_parallel(&fetcher, package, cancel).await?
        } else {
            self.fetch_sequential(&fetcher, package).await?
        };
        if matches!(outcome, RunOutcome::Cancelled) {
            return Ok(outcome);
        }

        merge::merge_package(package).await?;
        Ok(RunOutcome::Completed)
    }

    async fn fetch_sequential(
        &self,
        fetcher: &ChunkFetcher,
        package: &mut DownloadPackage,
    ) -> DownloadResult<RunOutcome> {
        for chunk in package.chunks.iter_mut() {
            match fetcher.fetch(chunk).await? {
                FetchOutcome::Completed => {}
                FetchOutcome::Cancelled => return Ok(RunOutcome::Cancelled),
            }
        }
        Ok(RunOutcome::Completed)
    }

    async fn fetch_parallel(
        &self,
        fetcher: &ChunkFetcher,
        package: &mut DownloadPackage,
        cancel: &CancellationToken,
    ) -> DownloadResult<RunOutcome> {
        let mut tasks = JoinSet::new();
        for mut chunk in std::mem::take(&mut package.chunks) {
            let fetcher = fetcher.clone();
            tasks.spawn(async move {
                let outcome = fetcher.fetch(&mut chunk).await;
                (chunk, outcome)
            });
        }

        let mut cancelled = false;
        let mut failure: Option<DownloadError> = None;
        let mut finished = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((chunk, outcome)) => {
                    finished.push(chunk);
                    match outcome {
                        Ok(FetchOutcome::Completed) => {}
                        Ok(FetchOutcome::Cancelled) => cancelled = true,
                        Err(e) => {
                            if failure.is_none() {
                                warn!(error = %e, "chunk failed, stopping remaining fetchers");
                                cancel.cancel();
                                failure = Some(e);
                            }
                        }
                    }
                }
                Err(join_error) => {
                    if failure.is_none() {
                        cancel.cancel();
                        failure = Some(DownloadError::WorkerPanic(join_error.to_string()));
                    }
                }
            }
        }

        finished.sort_by_key(|c| c.start());
        package.chunks = finished;

        if let Some(e) = failure {
            return Err(e);
        }
        if cancelled {
            return Ok(RunOutcome::Cancelled);
        }
        Ok(RunOutcome::Completed)
    }

    fn emit(&self, event: &DownloadEvent) {
        for observer in &self.observers {
            observer(event);
        }
    }
}

/// Pick the destination file name: `Content-Disposition` first, URL path
/// second, a generated name when neither yields anything usable.
async fn resolve_file_name(adapter: &dyn RequestAdapter) -> String {
    let raw = match adapter.content_disposition_filename().await {
        Some(name) if !name.trim().is_empty() => name,
        _ => adapter.file_name(),
    };
    sanitize_file_name(&raw)
}

/// Reduce a suggested name to a bare file name safe to join to a folder.
fn sanitize_file_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"');
    let candidate = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    if candidate.is_empty() || candidate == "." || candidate == ".." {
        format!("{}.bin", uuid::Uuid::new_v4().simple())
    } else {
        candidate.to_string()
    }
}

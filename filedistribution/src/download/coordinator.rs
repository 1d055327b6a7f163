//! The file downloader.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::pending::{self, FileFuture};
use super::retry::Deadline;
use super::source::{FileSource, ServeFileRequest};
use super::state::{Begin, DownloadState};
use crate::config::DownloaderConfig;
use crate::error::{DistributionError, Result};
use crate::receiver::FileReceiver;
use crate::reference::{DownloadRequest, FileReference};
use crate::registry::DownloadRegistry;

/// Fetches artifacts by reference from a distribution source.
///
/// Concurrent requests for the same reference share one download: the first
/// request starts a task that asks the source to serve the file, later ones
/// attach to the same [`FileFuture`]. The source then pushes the data to the
/// [`FileReceiver`] returned by [`receiver`](Self::receiver), which resolves
/// every attached caller once the artifact is verified and on disk.
///
/// # Example
///
/// ```ignore
/// let downloader = FileDownloader::new(config, Arc::new(source))?;
/// let path = downloader
///     .get_file(DownloadRequest::new("abc", "app-1"), Duration::from_secs(60))
///     .await;
/// ```
pub struct FileDownloader {
    state: Arc<DownloadState>,
    source: Arc<dyn FileSource>,
    runtime: Handle,
    shutdown: CancellationToken,
    next_attempt: AtomicU64,
}

impl std::fmt::Debug for FileDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDownloader")
            .field("config", &self.state.config)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl FileDownloader {
    /// Create a downloader running its tasks on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid (for example an empty set of
    /// accepted compression types), if called outside a tokio runtime, or if
    /// the download directory cannot be created.
    pub fn new(config: DownloaderConfig, source: Arc<dyn FileSource>) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            DistributionError::InvalidConfiguration(format!("no tokio runtime available: {}", e))
        })?;
        Self::with_runtime(config, source, runtime)
    }

    /// Create a downloader running its tasks on `runtime`.
    pub fn with_runtime(
        config: DownloaderConfig,
        source: Arc<dyn FileSource>,
        runtime: Handle,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.download_dir).map_err(|e| {
            DistributionError::InvalidConfiguration(format!(
                "cannot create download directory {}: {}",
                config.download_dir.display(),
                e
            ))
        })?;

        tracing::info!(
            download_dir = %config.download_dir.display(),
            timeout_ms = config.timeout.as_millis() as u64,
            retry_sleep_ms = config.sleep_between_retries.as_millis() as u64,
            accepted = ?config.accepted_compression_types,
            "File downloader started"
        );

        Ok(Self {
            state: Arc::new(DownloadState::new(config)),
            source,
            runtime,
            shutdown: CancellationToken::new(),
            next_attempt: AtomicU64::new(1),
        })
    }

    /// Receiver the source pushes artifacts to.
    pub fn receiver(&self) -> FileReceiver {
        FileReceiver::new(Arc::clone(&self.state))
    }

    pub fn registry(&self) -> &DownloadRegistry {
        &self.state.registry
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.state.config
    }

    /// Wait up to `timeout` for the artifact.
    ///
    /// Timing out does not cancel the download; other callers and later
    /// requests still benefit from it.
    ///
    /// # Arguments
    ///
    /// * `request` - Reference to fetch and who is asking for it
    /// * `timeout` - How long this caller waits
    ///
    /// # Returns
    ///
    /// The artifact path, or `None` if the download failed, was abandoned or
    /// did not finish within `timeout`.
    pub async fn get_file(&self, request: DownloadRequest, timeout: Duration) -> Option<PathBuf> {
        let reference = request.reference().clone();
        let future = self.get_future_file(request);
        match tokio::time::timeout(timeout, future).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::debug!(
                    %reference,
                    timeout_ms = timeout.as_millis() as u64,
                    "Gave up waiting for download"
                );
                None
            }
        }
    }

    /// Blocking form of [`get_file`](Self::get_file) for non-async callers.
    ///
    /// # Panics
    ///
    /// Panics if called from within an async context of the downloader's
    /// runtime.
    pub fn get_file_blocking(
        &self,
        request: DownloadRequest,
        timeout: Duration,
    ) -> Option<PathBuf> {
        self.runtime.block_on(self.get_file(request, timeout))
    }

    /// Shared future for the artifact, starting a download if none is running.
    ///
    /// All concurrent callers for a reference receive clones of one future.
    /// Already downloaded references resolve immediately.
    pub fn get_future_file(&self, request: DownloadRequest) -> FileFuture {
        self.start(request).0
    }

    /// Returns the shared future and whether a new download task was spawned.
    fn start(&self, request: DownloadRequest) -> (FileFuture, bool) {
        if self.shutdown.is_cancelled() {
            return (pending::ready(None), false);
        }

        let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
        match self.state.begin(&request, attempt) {
            Begin::Ready(outcome) | Begin::Attached(outcome) => (outcome, false),
            Begin::Started {
                outcome,
                attempt,
                inbound,
            } => {
                tracing::debug!(
                    reference = %request.reference(),
                    requester = request.requester(),
                    attempt,
                    inbound,
                    "Starting download"
                );
                let task = DownloadTask {
                    state: Arc::clone(&self.state),
                    source: Arc::clone(&self.source),
                    shutdown: self.shutdown.clone(),
                    request,
                    attempt,
                    outcome: outcome.clone(),
                };
                if inbound {
                    self.runtime.spawn(task.await_transfer(0));
                } else {
                    self.runtime.spawn(task.run());
                }
                (outcome, !inbound)
            }
        }
    }

    /// Start a download for a reference unless it is already downloaded or
    /// in flight.
    ///
    /// # Returns
    ///
    /// `true` if a new serve-file request was started, `false` if the
    /// reference was already available or in flight.
    pub fn download_if_needed(&self, request: DownloadRequest) -> bool {
        if self.is_downloading(request.reference()) {
            return false;
        }
        self.start(request).1
    }

    /// Whether a download or an inbound transfer for `reference` is in flight.
    pub fn is_downloading(&self, reference: &FileReference) -> bool {
        self.state.is_downloading(reference)
    }

    /// Progress fraction for one reference.
    pub fn status(&self, reference: &FileReference) -> f64 {
        self.state.registry.status(reference)
    }

    /// Progress fractions for every reference seen so far.
    pub fn all_statuses(&self) -> std::collections::BTreeMap<FileReference, f64> {
        self.state.registry.all_statuses()
    }

    /// Requests currently waiting for a transfer, ordered by reference.
    pub fn pending_downloads(&self) -> Vec<DownloadRequest> {
        self.state.pending_requests()
    }

    /// Forget a downloaded reference and delete its directory.
    ///
    /// Returns `false` for references that are unknown or still in flight.
    pub fn evict(&self, reference: &FileReference) -> Result<bool> {
        let evicted = self.state.evict(reference)?;
        if evicted {
            tracing::info!(%reference, "Evicted artifact");
        }
        Ok(evicted)
    }

    /// Stop all downloads. Pending callers resolve to `None` and new
    /// requests fail immediately.
    pub fn close(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let abandoned = self.state.abandon_all();
        tracing::info!(abandoned, "File downloader shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for FileDownloader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drives one download: asks the source to serve the reference, then waits
/// for the receiver to finish the transfer.
struct DownloadTask {
    state: Arc<DownloadState>,
    source: Arc<dyn FileSource>,
    shutdown: CancellationToken,
    request: DownloadRequest,
    attempt: u64,
    outcome: FileFuture,
}

impl DownloadTask {
    async fn run(self) {
        let reference = self.request.reference().clone();
        match self.request_transfer().await {
            Ok(attempts) => self.await_transfer(attempts).await,
            Err(error) => {
                self.state.fail(&reference, Some(self.attempt), &error);
            }
        }
    }

    /// Wait for the receiver to resolve the download, failing it if the
    /// transfer does not finish within the transfer timeout.
    async fn await_transfer(self, attempts: u32) {
        let reference = self.request.reference().clone();
        let transfer_timeout = self.state.config.transfer_timeout;
        tokio::select! {
            _ = self.outcome.clone() => {}
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(transfer_timeout) => {
                let error = DistributionError::Timeout {
                    reference: reference.clone(),
                    attempts,
                };
                if self.state.fail(&reference, Some(self.attempt), &error) {
                    tracing::warn!(
                        %reference,
                        transfer_timeout_ms = transfer_timeout.as_millis() as u64,
                        "Accepted transfer never completed"
                    );
                }
            }
        }
    }

    /// Call serve-file until the source accepts, retrying connection errors
    /// within the configured budget. Returns the number of calls made.
    ///
    /// The budget also bounds each call, so a source that never answers
    /// fails the download instead of pinning it in flight.
    async fn request_transfer(&self) -> Result<u32> {
        let config = &self.state.config;
        let reference = self.request.reference();
        let serve_request = ServeFileRequest {
            reference: reference.clone(),
            requester: self.request.requester().to_string(),
            accepted_compression_types: config.accepted_compression_types.clone(),
        };
        let deadline = Deadline::after(config.timeout);
        let mut attempts = 0u32;

        loop {
            if !self.state.is_current(reference, self.attempt) {
                // Completed by an unsolicited transfer, or abandoned
                return Ok(attempts);
            }

            attempts += 1;
            let call = tokio::time::timeout_at(
                deadline.instant(),
                self.source.serve_file(&serve_request),
            );
            let response = tokio::select! {
                response = call => response.map_err(|_| {
                    tracing::warn!(%reference, attempts, "Serve request did not answer in time");
                    DistributionError::Timeout {
                        reference: reference.clone(),
                        attempts,
                    }
                })?,
                _ = self.shutdown.cancelled() => return Err(DistributionError::ShutDown),
            };

            match response {
                Ok(response) if response.is_accepted() => {
                    tracing::debug!(%reference, attempts, "Source accepted serve request");
                    return Ok(attempts);
                }
                Ok(response) => {
                    return Err(DistributionError::UnknownReference {
                        reference: reference.clone(),
                        message: format!("{} (code {})", response.message, response.code),
                    });
                }
                Err(e) => {
                    let error = DistributionError::from(e);
                    tracing::warn!(%reference, attempts, %error, "Serve request failed");
                    self.source.switch_connection();

                    let Some(delay) = deadline.next_retry_delay(config.sleep_between_retries) else {
                        return Err(DistributionError::Timeout {
                            reference: reference.clone(),
                            attempts,
                        });
                    };
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => return Err(DistributionError::ShutDown),
                    }
                }
            }
        }
    }
}

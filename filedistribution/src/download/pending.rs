//! Shared outcome of one in-flight download.

use std::path::PathBuf;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;

use crate::reference::DownloadRequest;

/// Result every caller of a download observes: the artifact path, or `None`
/// if the download failed or was abandoned.
pub type DownloadOutcome = Option<PathBuf>;

/// Cloneable future resolving to a [`DownloadOutcome`].
///
/// Every caller attached to the same in-flight download holds a clone of the
/// same future.
pub type FileFuture = Shared<BoxFuture<'static, DownloadOutcome>>;

/// A future that is already resolved.
pub fn ready(outcome: DownloadOutcome) -> FileFuture {
    futures::future::ready(outcome).boxed().shared()
}

/// In-flight download for one reference.
pub(crate) struct PendingDownload {
    request: DownloadRequest,
    attempt: u64,
    started: Instant,
    resolver: oneshot::Sender<DownloadOutcome>,
    outcome: FileFuture,
}

impl std::fmt::Debug for PendingDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingDownload")
            .field("request", &self.request)
            .field("attempt", &self.attempt)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl PendingDownload {
    pub(crate) fn new(request: DownloadRequest, attempt: u64) -> Self {
        let (resolver, receiver) = oneshot::channel();
        // A dropped resolver means the download was abandoned
        let outcome = receiver.map(|result| result.ok().flatten()).boxed().shared();
        Self {
            request,
            attempt,
            started: Instant::now(),
            resolver,
            outcome,
        }
    }

    pub(crate) fn request(&self) -> &DownloadRequest {
        &self.request
    }

    /// Identifies the download task that owns this entry.
    pub(crate) fn attempt(&self) -> u64 {
        self.attempt
    }

    pub(crate) fn outcome(&self) -> FileFuture {
        self.outcome.clone()
    }

    /// Resolve every attached caller. Consumes the entry, so this happens once.
    pub(crate) fn resolve(self, outcome: DownloadOutcome) {
        tracing::debug!(
            reference = %self.request.reference(),
            requester = self.request.requester(),
            success = outcome.is_some(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Resolving download"
        );
        // Err only if every caller has already given up
        let _ = self.resolver.send(outcome);
    }
}

//! Shared state of the downloader.
//!
//! One mutex guards the table of pending downloads and open receive
//! sessions. The coordinator, the download tasks and the inbound receiver
//! all go through it, so "is this reference already in flight?" and "start
//! it" happen atomically and no reference is ever transferred twice
//! concurrently.
//!
//! A reference whose transfer has ended but is still being written to disk
//! stays marked as finalizing until it is recorded complete or failed.
//! Disk work happens outside the lock.
//!
//! Lock order: the in-flight table first, then the registry.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use parking_lot::{Mutex, MutexGuard};

use super::pending::{self, FileFuture, PendingDownload};
use crate::codec;
use crate::config::DownloaderConfig;
use crate::error::{DistributionError, SessionError};
use crate::receiver::ReceiveSession;
use crate::reference::{DownloadRequest, FileReference, SessionId};
use crate::registry::DownloadRegistry;

/// Pending downloads, open sessions and transfers being finalized.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    pending: HashMap<FileReference, PendingDownload>,
    sessions: HashMap<SessionId, ReceiveSession>,
    session_refs: HashMap<FileReference, SessionId>,
    finalizing: HashSet<FileReference>,
}

impl InFlight {
    /// Register a session, replacing any earlier session for the same
    /// reference. Returns the replaced session.
    pub(crate) fn insert_session(
        &mut self,
        session: ReceiveSession,
    ) -> Result<Option<ReceiveSession>, SessionError> {
        let session_id = session.session_id();
        if let Some(existing) = self.sessions.get(&session_id) {
            if existing.reference() != session.reference() {
                return Err(SessionError::SessionIdInUse {
                    session_id,
                    reference: existing.reference().clone(),
                });
            }
        }

        let replaced = self.remove_session_for(session.reference());
        self.session_refs
            .insert(session.reference().clone(), session_id);
        self.sessions.insert(session_id, session);
        Ok(replaced)
    }

    pub(crate) fn session_mut(&mut self, session_id: SessionId) -> Option<&mut ReceiveSession> {
        self.sessions.get_mut(&session_id)
    }

    /// Remove a session by id.
    pub(crate) fn take_session(&mut self, session_id: SessionId) -> Option<ReceiveSession> {
        let session = self.sessions.remove(&session_id)?;
        self.session_refs.remove(session.reference());
        Some(session)
    }

    /// Remove the session for a reference, if any.
    pub(crate) fn remove_session_for(
        &mut self,
        reference: &FileReference,
    ) -> Option<ReceiveSession> {
        let session_id = self.session_refs.remove(reference)?;
        self.sessions.remove(&session_id)
    }

    /// Whether a received transfer for `reference` is being written to disk.
    pub(crate) fn is_finalizing(&self, reference: &FileReference) -> bool {
        self.finalizing.contains(reference)
    }

    /// Whether bytes for `reference` are arriving or being finalized.
    fn is_receiving(&self, reference: &FileReference) -> bool {
        self.session_refs.contains_key(reference) || self.finalizing.contains(reference)
    }

    fn is_active(&self, reference: &FileReference) -> bool {
        self.pending.contains_key(reference) || self.is_receiving(reference)
    }
}

/// How a request was attached to the download table.
pub(crate) enum Begin {
    /// Already available; no transfer needed.
    Ready(FileFuture),
    /// Joined a download already in flight.
    Attached(FileFuture),
    /// A new download was registered; the caller must drive it. With
    /// `inbound` set a transfer is already arriving, so the caller only
    /// waits for it instead of asking the source.
    Started {
        outcome: FileFuture,
        attempt: u64,
        inbound: bool,
    },
}

/// State shared by the downloader, its tasks and its receiver.
#[derive(Debug)]
pub(crate) struct DownloadState {
    pub(crate) config: DownloaderConfig,
    pub(crate) registry: DownloadRegistry,
    in_flight: Mutex<InFlight>,
}

impl DownloadState {
    pub(crate) fn new(config: DownloaderConfig) -> Self {
        Self {
            config,
            registry: DownloadRegistry::new(),
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock()
    }

    /// Resolve from the registry or disk, join an in-flight download, or
    /// register a new one under `attempt`.
    pub(crate) fn begin(&self, request: &DownloadRequest, attempt: u64) -> Begin {
        let reference = request.reference();
        if let Some(begin) = self.attach(&mut self.lock(), request, attempt) {
            return begin;
        }

        let on_disk = codec::existing_artifact(reference, &self.config.download_dir);

        // Re-check: another caller or a transfer may have won the race
        let mut in_flight = self.lock();
        if let Some(begin) = self.attach(&mut in_flight, request, attempt) {
            return begin;
        }

        if let Some(path) = on_disk {
            tracing::debug!(%reference, path = %path.display(), "Found artifact on disk");
            self.registry.record_complete(reference, path.clone());
            return Begin::Ready(pending::ready(Some(path)));
        }

        let outcome = self.register(&mut in_flight, request, attempt);
        Begin::Started {
            outcome,
            attempt,
            inbound: false,
        }
    }

    /// Resolve `request` from what is already known without touching disk.
    fn attach(
        &self,
        in_flight: &mut InFlight,
        request: &DownloadRequest,
        attempt: u64,
    ) -> Option<Begin> {
        let reference = request.reference();
        if let Some(path) = self.registry.completed_path(reference) {
            return Some(Begin::Ready(pending::ready(Some(path))));
        }

        if let Some(existing) = in_flight.pending.get(reference) {
            tracing::debug!(
                %reference,
                requester = request.requester(),
                first_requester = existing.request().requester(),
                "Joining download in progress"
            );
            return Some(Begin::Attached(existing.outcome()));
        }

        if in_flight.is_receiving(reference) {
            tracing::debug!(%reference, "Waiting for transfer already arriving");
            let outcome = self.register(in_flight, request, attempt);
            return Some(Begin::Started {
                outcome,
                attempt,
                inbound: true,
            });
        }
        None
    }

    fn register(
        &self,
        in_flight: &mut InFlight,
        request: &DownloadRequest,
        attempt: u64,
    ) -> FileFuture {
        let reference = request.reference();
        let entry = PendingDownload::new(request.clone(), attempt);
        let outcome = entry.outcome();
        in_flight.pending.insert(reference.clone(), entry);
        self.registry.record_started(reference);
        outcome
    }

    /// Claim `reference` for finalization, removing any open session for it.
    ///
    /// Fails if the reference is already complete or another transfer for it
    /// is being finalized. Returns the superseded session.
    pub(crate) fn claim_finalize(
        &self,
        in_flight: &mut InFlight,
        reference: &FileReference,
    ) -> Result<Option<ReceiveSession>, DistributionError> {
        if self.registry.completed_path(reference).is_some() {
            return Err(DistributionError::AlreadyComplete(reference.clone()));
        }
        if !in_flight.finalizing.insert(reference.clone()) {
            return Err(SessionError::AlreadyFinalizing(reference.clone()).into());
        }
        Ok(in_flight.remove_session_for(reference))
    }

    /// Take the session `session_id` and claim its reference for
    /// finalization in one step.
    pub(crate) fn take_for_finalize(
        &self,
        session_id: SessionId,
    ) -> Result<ReceiveSession, DistributionError> {
        let mut in_flight = self.lock();
        let session = in_flight
            .take_session(session_id)
            .ok_or(SessionError::UnknownSession(session_id))?;
        self.claim_finalize(&mut in_flight, session.reference())?;
        Ok(session)
    }

    /// Whether `attempt` still owns the pending entry for `reference`.
    pub(crate) fn is_current(&self, reference: &FileReference, attempt: u64) -> bool {
        self.lock()
            .pending
            .get(reference)
            .is_some_and(|p| p.attempt() == attempt)
    }

    pub(crate) fn is_downloading(&self, reference: &FileReference) -> bool {
        self.lock().is_active(reference)
    }

    pub(crate) fn pending_requests(&self) -> Vec<DownloadRequest> {
        let in_flight = self.lock();
        let mut requests: Vec<_> = in_flight
            .pending
            .values()
            .map(|p| p.request().clone())
            .collect();
        requests.sort_by(|a, b| a.reference().cmp(b.reference()));
        requests
    }

    /// Record a finalized artifact and resolve everyone waiting for it.
    pub(crate) fn complete(&self, reference: &FileReference, path: PathBuf) {
        let entry = {
            let mut in_flight = self.lock();
            in_flight.finalizing.remove(reference);
            self.registry.record_complete(reference, path.clone());
            in_flight.pending.remove(reference)
        };

        tracing::info!(%reference, path = %path.display(), "Download complete");
        if let Some(entry) = entry {
            entry.resolve(Some(path));
        }
    }

    /// Record a failure and resolve waiters with an empty outcome.
    ///
    /// With `attempt` set, only the download task owning the pending entry
    /// can fail it, and not while a received transfer is being finalized.
    /// Returns whether a pending entry was resolved.
    pub(crate) fn fail(
        &self,
        reference: &FileReference,
        attempt: Option<u64>,
        error: &DistributionError,
    ) -> bool {
        let entry = {
            let mut in_flight = self.lock();
            let owned = match (attempt, in_flight.pending.get(reference)) {
                (Some(_), _) if in_flight.is_finalizing(reference) => false,
                (Some(attempt), Some(p)) => p.attempt() == attempt,
                (Some(_), None) => false,
                (None, _) => true,
            };
            if !owned {
                return false;
            }

            in_flight.remove_session_for(reference);
            in_flight.finalizing.remove(reference);
            self.registry.record_failed(reference);
            in_flight.pending.remove(reference)
        };

        tracing::warn!(%reference, error = %error, "Download failed");
        match entry {
            Some(entry) => {
                entry.resolve(None);
                true
            }
            None => false,
        }
    }

    /// Resolve every pending download empty and drop all sessions.
    pub(crate) fn abandon_all(&self) -> usize {
        let entries: Vec<_> = {
            let mut in_flight = self.lock();
            in_flight.sessions.clear();
            in_flight.session_refs.clear();
            in_flight.finalizing.clear();
            let entries: Vec<_> = in_flight.pending.drain().collect();
            for (reference, _) in &entries {
                self.registry.record_failed(reference);
            }
            entries
        };

        let count = entries.len();
        for (_, entry) in entries {
            entry.resolve(None);
        }
        count
    }

    /// Forget a reference: registry record, on-disk artifact and any session.
    ///
    /// References with a pending download or a transfer being finalized are
    /// left alone. The artifact directory is moved aside under the lock and
    /// deleted after it is released.
    pub(crate) fn evict(&self, reference: &FileReference) -> Result<bool, DistributionError> {
        let dir = self.config.download_dir.join(reference.value());
        let write_failed = |path: &std::path::Path, e: std::io::Error| crate::error::CodecError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        };
        let graveyard = tempfile::Builder::new()
            .prefix(".evicted-")
            .tempdir_in(&self.config.download_dir)
            .map_err(|e| write_failed(&self.config.download_dir, e))?;

        let (known, on_disk) = {
            let mut in_flight = self.lock();
            if in_flight.pending.contains_key(reference) || in_flight.is_finalizing(reference) {
                return Ok(false);
            }
            in_flight.remove_session_for(reference);
            let known = self.registry.evict(reference).is_some();

            let on_disk = reference.is_path_safe() && dir.exists();
            if on_disk {
                std::fs::rename(&dir, graveyard.path().join(reference.value()))
                    .map_err(|e| write_failed(&dir, e))?;
            }
            (known, on_disk)
        };

        let path = graveyard.path().to_path_buf();
        graveyard.close().map_err(|e| write_failed(&path, e))?;
        Ok(known || on_disk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ArtifactEncoding;
    use tempfile::TempDir;

    fn state(temp: &TempDir) -> DownloadState {
        DownloadState::new(DownloaderConfig::new(temp.path()))
    }

    fn session(id: u64, reference: &str) -> ReceiveSession {
        ReceiveSession::open(
            std::path::Path::new("/unused"),
            SessionId::new(id),
            FileReference::new(reference),
            ArtifactEncoding::SingleFile {
                name: "f".to_string(),
            },
            1,
        )
    }

    #[test]
    fn test_begin_starts_once_then_attaches() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let request = DownloadRequest::for_reference("abc");

        assert!(matches!(state.begin(&request, 1), Begin::Started { attempt: 1, .. }));
        assert!(matches!(state.begin(&request, 2), Begin::Attached(_)));
        assert!(state.is_current(request.reference(), 1));
        assert!(!state.is_current(request.reference(), 2));
        assert!(state.is_downloading(request.reference()));
    }

    #[test]
    fn test_begin_uses_artifact_on_disk() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("abc")).unwrap();
        std::fs::write(temp.path().join("abc/file.jar"), "x").unwrap();
        let state = state(&temp);

        let begin = state.begin(&DownloadRequest::for_reference("abc"), 1);

        assert!(matches!(begin, Begin::Ready(_)));
        assert_eq!(
            state.registry.completed_path(&FileReference::new("abc")),
            Some(temp.path().join("abc/file.jar"))
        );
    }

    #[test]
    fn test_fail_respects_attempt_ownership() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let request = DownloadRequest::for_reference("abc");
        state.begin(&request, 7);

        let error = DistributionError::ShutDown;
        assert!(!state.fail(request.reference(), Some(6), &error));
        assert!(state.is_downloading(request.reference()));

        assert!(state.fail(request.reference(), Some(7), &error));
        assert!(!state.is_downloading(request.reference()));
    }

    #[test]
    fn test_task_cannot_fail_reference_being_finalized() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let request = DownloadRequest::for_reference("abc");
        state.begin(&request, 4);
        state
            .claim_finalize(&mut state.lock(), request.reference())
            .unwrap();

        assert!(!state.fail(request.reference(), Some(4), &DistributionError::ShutDown));
        assert_eq!(state.pending_requests().len(), 1);

        state.complete(request.reference(), temp.path().join("abc/f"));
        assert!(!state.is_downloading(request.reference()));
    }

    #[test]
    fn test_insert_session_replaces_previous_for_reference() {
        let mut in_flight = InFlight::default();
        assert!(in_flight.insert_session(session(1, "abc")).unwrap().is_none());

        let replaced = in_flight.insert_session(session(2, "abc")).unwrap().unwrap();
        assert_eq!(replaced.session_id(), SessionId::new(1));
        assert!(in_flight.session_mut(SessionId::new(1)).is_none());
        assert!(in_flight.session_mut(SessionId::new(2)).is_some());
    }

    #[test]
    fn test_insert_session_rejects_id_reuse() {
        let mut in_flight = InFlight::default();
        in_flight.insert_session(session(1, "abc")).unwrap();

        let err = in_flight.insert_session(session(1, "def")).unwrap_err();
        assert!(matches!(err, SessionError::SessionIdInUse { .. }));
    }

    #[test]
    fn test_begin_waits_for_arriving_transfer() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        state.lock().insert_session(session(1, "abc")).unwrap();

        let begin = state.begin(&DownloadRequest::for_reference("abc"), 3);

        assert!(matches!(
            begin,
            Begin::Started {
                attempt: 3,
                inbound: true,
                ..
            }
        ));
        assert_eq!(state.pending_requests().len(), 1);
    }

    #[test]
    fn test_claim_finalize_once_per_reference() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let reference = FileReference::new("abc");
        let mut in_flight = state.lock();

        state.claim_finalize(&mut in_flight, &reference).unwrap();
        let err = state.claim_finalize(&mut in_flight, &reference).unwrap_err();

        assert!(matches!(
            err,
            DistributionError::Session(SessionError::AlreadyFinalizing(_))
        ));
        assert!(in_flight.is_active(&reference));
    }

    #[test]
    fn test_complete_releases_finalize_claim() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let reference = FileReference::new("abc");
        state.claim_finalize(&mut state.lock(), &reference).unwrap();
        assert!(state.is_downloading(&reference));

        state.complete(&reference, temp.path().join("abc/f"));

        assert!(!state.is_downloading(&reference));
        assert!(matches!(
            state.claim_finalize(&mut state.lock(), &reference),
            Err(DistributionError::AlreadyComplete(_))
        ));
    }

    #[test]
    fn test_evict_deletes_artifact_directory() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("abc")).unwrap();
        std::fs::write(temp.path().join("abc/file.jar"), "x").unwrap();
        let state = state(&temp);
        state
            .registry
            .record_complete(&FileReference::new("abc"), temp.path().join("abc/file.jar"));

        assert!(state.evict(&FileReference::new("abc")).unwrap());

        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_evict_skips_finalizing() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let reference = FileReference::new("abc");
        state.claim_finalize(&mut state.lock(), &reference).unwrap();

        assert!(!state.evict(&reference).unwrap());
        assert!(state.is_downloading(&reference));
    }

    #[test]
    fn test_evict_skips_pending() {
        let temp = TempDir::new().unwrap();
        let state = state(&temp);
        let request = DownloadRequest::for_reference("abc");
        state.begin(&request, 1);

        assert!(!state.evict(request.reference()).unwrap());
        assert!(state.is_downloading(request.reference()));
    }
}

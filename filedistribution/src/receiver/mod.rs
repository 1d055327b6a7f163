//! Inbound side of the push protocol.
//!
//! The source pushes artifacts to this node after accepting a serve-file
//! call. [`FileReceiver`] routes each message to its [`ReceiveSession`],
//! finalizes completed transfers and resolves the callers waiting on the
//! reference through the shared download table.
//!
//! Transfers the node never asked for are accepted as well; they complete
//! the reference in the registry and satisfy later requests from disk.
//!
//! Only one transfer per reference is finalized at a time. A blob or an eof
//! claims the reference before writing to disk, and a second transfer for a
//! claimed or completed reference is rejected.

mod session;

pub use session::ReceiveSession;

use std::path::PathBuf;
use std::sync::Arc;

use crate::codec::CompressionType;
use crate::download::state::DownloadState;
use crate::error::{DistributionError, Result, SessionError};
use crate::protocol::{FileBlob, FileEof, FileMeta, FilePart, InboundMessage};
use crate::reference::{FileReference, SessionId};
use crate::registry::DownloadStatus;

/// Session id used for single-message blob transfers.
const BLOB_SESSION_ID: SessionId = SessionId::new(0);

/// Receives pushed artifacts on behalf of a
/// [`FileDownloader`](crate::download::FileDownloader).
///
/// Cheap to clone; every clone feeds the same downloader.
#[derive(Clone)]
pub struct FileReceiver {
    state: Arc<DownloadState>,
}

impl std::fmt::Debug for FileReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReceiver")
            .field("download_dir", &self.state.config.download_dir)
            .finish()
    }
}

impl FileReceiver {
    pub(crate) fn new(state: Arc<DownloadState>) -> Self {
        Self { state }
    }

    /// Decode a binary frame and handle it.
    pub fn handle_frame(&self, frame: &[u8]) -> Result<Option<PathBuf>> {
        let message = InboundMessage::decode(frame)?;
        self.handle(message)
    }

    /// Handle one inbound message.
    ///
    /// Returns the artifact path when the message completed a transfer.
    pub fn handle(&self, message: InboundMessage) -> Result<Option<PathBuf>> {
        match message {
            InboundMessage::Meta(meta) => self.receive_file_meta(meta).map(|()| None),
            InboundMessage::Part(part) => self.receive_file_part(part).map(|()| None),
            InboundMessage::Eof(eof) => self.receive_file_eof(eof).map(Some),
            InboundMessage::Blob(blob) => self.receive_file(blob).map(Some),
        }
    }

    /// Open a session for an announced chunked transfer.
    ///
    /// A session already open for the same reference is discarded.
    pub fn receive_file_meta(&self, meta: FileMeta) -> Result<()> {
        let FileMeta {
            reference,
            session_id,
            encoding_type,
            compression,
            filename,
            total_length,
        } = meta;
        self.check_acceptable(&reference, compression)?;

        let encoding = encoding_type.into_encoding(filename, compression);
        let session = ReceiveSession::open(
            &self.state.config.download_dir,
            session_id,
            reference.clone(),
            encoding,
            total_length,
        );

        let replaced = {
            let mut in_flight = self.state.lock();
            if self.state.registry.completed_path(&reference).is_some() {
                return Err(DistributionError::AlreadyComplete(reference));
            }
            if in_flight.is_finalizing(&reference) {
                return Err(SessionError::AlreadyFinalizing(reference).into());
            }
            let replaced = in_flight.insert_session(session)?;
            self.state.registry.record_started(&reference);
            replaced
        };
        if let Some(old) = replaced {
            tracing::warn!(
                %reference,
                old_session = %old.session_id(),
                new_session = %session_id,
                received = old.received(),
                "Discarding unfinished session for reference"
            );
        }
        Ok(())
    }

    /// Add one chunk to its session.
    ///
    /// A protocol violation abandons the whole transfer.
    pub fn receive_file_part(&self, part: FilePart) -> Result<()> {
        let mut in_flight = self.state.lock();
        let Some(session) = in_flight.session_mut(part.session_id) else {
            return Err(SessionError::UnknownSession(part.session_id).into());
        };

        match session.add_part(part.index, part.data) {
            Ok(()) => {
                self.state
                    .registry
                    .record_progress(session.reference(), session.progress());
                Ok(())
            }
            Err(e) => {
                let reference = session.reference().clone();
                drop(in_flight);
                let error = DistributionError::from(e);
                self.state.fail(&reference, None, &error);
                Err(error)
            }
        }
    }

    /// Close a session, verify its content hash and finalize the artifact.
    pub fn receive_file_eof(&self, eof: FileEof) -> Result<PathBuf> {
        let session = self.state.take_for_finalize(eof.session_id)?;
        let reference = session.reference().clone();

        if eof.error_code != 0 {
            let error = DistributionError::TransferAborted {
                reference: reference.clone(),
                code: eof.error_code,
                message: eof.error_message,
            };
            self.state.fail(&reference, None, &error);
            return Err(error);
        }

        self.finish(&reference, session.close(eof.xxhash))
    }

    /// Receive a whole artifact delivered in one message.
    ///
    /// # Returns
    ///
    /// The path of the finalized artifact.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyComplete` or `SessionError::AlreadyFinalizing` without
    /// touching disk when the reference is complete or another transfer of it
    /// is being finalized. A hash mismatch or write failure fails the
    /// reference.
    pub fn receive_file(&self, blob: FileBlob) -> Result<PathBuf> {
        let FileBlob {
            reference,
            encoding_type,
            compression,
            filename,
            content,
            xxhash,
        } = blob;
        self.check_acceptable(&reference, compression)?;

        let superseded = {
            let mut in_flight = self.state.lock();
            self.state.claim_finalize(&mut in_flight, &reference)?
        };
        if let Some(old) = superseded {
            tracing::warn!(
                %reference,
                old_session = %old.session_id(),
                "Blob supersedes unfinished session"
            );
        }

        let encoding = encoding_type.into_encoding(filename, compression);
        let mut session = ReceiveSession::open(
            &self.state.config.download_dir,
            BLOB_SESSION_ID,
            reference.clone(),
            encoding,
            content.len() as u64,
        );
        let result = session
            .add_part(0, content)
            .map_err(DistributionError::from)
            .and_then(|()| session.close(xxhash));

        self.finish(&reference, result)
    }

    fn check_acceptable(
        &self,
        reference: &FileReference,
        compression: CompressionType,
    ) -> Result<()> {
        if self.state.registry.download_status(reference) == DownloadStatus::Complete {
            return Err(DistributionError::AlreadyComplete(reference.clone()));
        }

        if !self.state.config.accepts(compression) {
            let error = DistributionError::UnsupportedCompression {
                reference: reference.clone(),
                compression,
            };
            // Leave a transfer already being finalized to finish on its own
            let finalizing = self.state.lock().is_finalizing(reference);
            if !finalizing {
                self.state.fail(reference, None, &error);
            }
            return Err(error);
        }
        Ok(())
    }

    fn finish(&self, reference: &FileReference, result: Result<PathBuf>) -> Result<PathBuf> {
        match result {
            Ok(path) => {
                self.state.complete(reference, path.clone());
                Ok(path)
            }
            Err(e) => {
                self.state.fail(reference, None, &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{content_hash, EncodingType};
    use crate::config::DownloaderConfig;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn receiver(temp: &TempDir) -> FileReceiver {
        FileReceiver::new(Arc::new(DownloadState::new(DownloaderConfig::new(
            temp.path(),
        ))))
    }

    fn meta(reference: &str, session: u64, length: u64) -> FileMeta {
        FileMeta {
            reference: FileReference::new(reference),
            session_id: SessionId::new(session),
            encoding_type: EncodingType::File,
            compression: CompressionType::None,
            filename: "data.bin".to_string(),
            total_length: length,
        }
    }

    fn part(session: u64, index: u32, data: &'static [u8]) -> FilePart {
        FilePart {
            session_id: SessionId::new(session),
            index,
            data: Bytes::from_static(data),
        }
    }

    #[test]
    fn test_chunked_transfer_completes() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);

        receiver.receive_file_meta(meta("abc", 1, 6)).unwrap();
        receiver.receive_file_part(part(1, 1, b"def")).unwrap();
        receiver.receive_file_part(part(1, 0, b"abc")).unwrap();
        let path = receiver
            .receive_file_eof(FileEof::ok(SessionId::new(1), content_hash(b"abcdef")))
            .unwrap();

        assert_eq!(path, temp.path().join("abc/data.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        assert_eq!(receiver.state.registry.status(&FileReference::new("abc")), 1.0);
    }

    #[test]
    fn test_progress_reported_while_receiving() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);

        receiver.receive_file_meta(meta("abc", 1, 4)).unwrap();
        receiver.receive_file_part(part(1, 0, b"ab")).unwrap();

        assert_eq!(receiver.state.registry.status(&FileReference::new("abc")), 0.5);
    }

    #[test]
    fn test_part_for_unknown_session() {
        let temp = TempDir::new().unwrap();
        let err = receiver(&temp).receive_file_part(part(9, 0, b"x")).unwrap_err();
        assert!(matches!(
            err,
            DistributionError::Session(SessionError::UnknownSession(_))
        ));
    }

    #[test]
    fn test_duplicate_part_abandons_transfer() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);
        receiver.receive_file_meta(meta("abc", 1, 4)).unwrap();
        receiver.receive_file_part(part(1, 0, b"ab")).unwrap();

        assert!(receiver.receive_file_part(part(1, 0, b"ab")).is_err());
        assert_eq!(
            receiver.state.registry.download_status(&FileReference::new("abc")),
            DownloadStatus::Failed
        );
        assert!(receiver.receive_file_part(part(1, 1, b"cd")).is_err());
    }

    #[test]
    fn test_aborted_transfer_fails_reference() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);
        receiver.receive_file_meta(meta("abc", 1, 4)).unwrap();

        let eof = FileEof {
            session_id: SessionId::new(1),
            xxhash: 0,
            error_code: 2,
            error_message: "source went away".to_string(),
        };
        let err = receiver.receive_file_eof(eof).unwrap_err();

        assert!(matches!(err, DistributionError::TransferAborted { code: 2, .. }));
        assert!(!temp.path().join("abc").exists());
    }

    #[test]
    fn test_wrong_hash_is_not_recorded_complete() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);
        receiver.receive_file_meta(meta("abc", 1, 3)).unwrap();
        receiver.receive_file_part(part(1, 0, b"abc")).unwrap();

        let err = receiver
            .receive_file_eof(FileEof::ok(SessionId::new(1), 42))
            .unwrap_err();

        assert!(matches!(err, DistributionError::HashMismatch { .. }));
        assert_eq!(
            receiver.state.registry.download_status(&FileReference::new("abc")),
            DownloadStatus::Failed
        );
    }

    #[test]
    fn test_unaccepted_compression_rejected_at_meta() {
        let temp = TempDir::new().unwrap();
        let state = DownloadState::new(
            DownloaderConfig::new(temp.path())
                .with_accepted_compression_types([CompressionType::None]),
        );
        let receiver = FileReceiver::new(Arc::new(state));
        let mut announced = meta("abc", 1, 3);
        announced.encoding_type = EncodingType::Archive;
        announced.compression = CompressionType::Gzip;

        let err = receiver.receive_file_meta(announced).unwrap_err();

        assert!(matches!(err, DistributionError::UnsupportedCompression { .. }));
        assert!(receiver.receive_file_part(part(1, 0, b"abc")).is_err());
    }

    #[test]
    fn test_blob_after_completion_is_rejected() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);
        receiver.receive_file(blob("abc", b"content")).unwrap();
        let err = receiver.receive_file(blob("abc", b"content")).unwrap_err();

        assert!(matches!(err, DistributionError::AlreadyComplete(_)));
    }

    fn blob(reference: &str, content: &'static [u8]) -> FileBlob {
        FileBlob {
            reference: FileReference::new(reference),
            encoding_type: EncodingType::File,
            compression: CompressionType::None,
            filename: "abc.jar".to_string(),
            content: Bytes::from_static(content),
            xxhash: content_hash(content),
        }
    }

    #[test]
    fn test_blob_rejected_while_reference_finalizing() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);
        let reference = FileReference::new("abc");
        {
            let mut in_flight = receiver.state.lock();
            receiver.state.claim_finalize(&mut in_flight, &reference).unwrap();
        }

        let err = receiver.receive_file(blob("abc", b"content")).unwrap_err();

        assert!(matches!(
            err,
            DistributionError::Session(SessionError::AlreadyFinalizing(_))
        ));
        assert!(!temp.path().join("abc").exists());
        assert_ne!(
            receiver.state.registry.download_status(&reference),
            DownloadStatus::Failed
        );
    }

    #[test]
    fn test_meta_rejected_while_reference_finalizing() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);
        {
            let mut in_flight = receiver.state.lock();
            receiver
                .state
                .claim_finalize(&mut in_flight, &FileReference::new("abc"))
                .unwrap();
        }

        assert!(receiver.receive_file_meta(meta("abc", 1, 3)).is_err());
        assert!(receiver.receive_file_part(part(1, 0, b"abc")).is_err());
    }

    #[test]
    fn test_eof_keeps_reference_in_flight_until_recorded() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);
        let reference = FileReference::new("abc");
        receiver.receive_file_meta(meta("abc", 1, 3)).unwrap();
        receiver.receive_file_part(part(1, 0, b"abc")).unwrap();

        let session = receiver.state.take_for_finalize(SessionId::new(1)).unwrap();
        assert!(receiver.state.is_downloading(&reference));

        let path = session.close(content_hash(b"abc")).unwrap();
        receiver.finish(&reference, Ok(path)).unwrap();
        assert!(!receiver.state.is_downloading(&reference));
    }

    #[test]
    fn test_handle_frame_routes_messages() {
        let temp = TempDir::new().unwrap();
        let receiver = receiver(&temp);
        let frames = [
            InboundMessage::Meta(meta("abc", 3, 2)),
            InboundMessage::Part(part(3, 0, b"hi")),
            InboundMessage::Eof(FileEof::ok(SessionId::new(3), content_hash(b"hi"))),
        ];

        let mut last = None;
        for message in frames {
            last = receiver.handle_frame(&message.encode().unwrap()).unwrap();
        }

        assert_eq!(last, Some(temp.path().join("abc/data.bin")));
    }
}

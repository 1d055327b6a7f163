//! Assembly of one chunked transfer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;

use crate::codec::{self, ArtifactEncoding};
use crate::error::{DistributionError, Result, SessionError};
use crate::reference::{FileReference, SessionId};

/// In-memory accumulator for one in-flight transfer.
///
/// Parts are keyed by index, so they may arrive in any order; the payload is
/// always assembled in index order.
#[derive(Debug)]
pub struct ReceiveSession {
    session_id: SessionId,
    reference: FileReference,
    encoding: ArtifactEncoding,
    declared_length: u64,
    target_dir: PathBuf,
    parts: BTreeMap<u32, Bytes>,
    received: u64,
    opened_at: Instant,
}

impl ReceiveSession {
    /// Open a session that will finalize into `target_dir`.
    pub fn open(
        target_dir: &Path,
        session_id: SessionId,
        reference: FileReference,
        encoding: ArtifactEncoding,
        declared_length: u64,
    ) -> Self {
        tracing::debug!(
            %reference,
            %session_id,
            name = encoding.name(),
            declared_length,
            "Opened receive session"
        );
        Self {
            session_id,
            reference,
            encoding,
            declared_length,
            target_dir: target_dir.to_path_buf(),
            parts: BTreeMap::new(),
            received: 0,
            opened_at: Instant::now(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn reference(&self) -> &FileReference {
        &self.reference
    }

    pub fn encoding(&self) -> &ArtifactEncoding {
        &self.encoding
    }

    pub fn declared_length(&self) -> u64 {
        self.declared_length
    }

    /// Bytes received so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Fraction of the declared length received.
    pub fn progress(&self) -> f64 {
        if self.declared_length == 0 {
            return 0.0;
        }
        self.received as f64 / self.declared_length as f64
    }

    /// Store one part.
    pub fn add_part(&mut self, index: u32, bytes: Bytes) -> std::result::Result<(), SessionError> {
        if self.parts.contains_key(&index) {
            return Err(SessionError::DuplicatePart {
                session_id: self.session_id,
                index,
            });
        }

        let received = self.received + bytes.len() as u64;
        if received > self.declared_length {
            return Err(SessionError::LengthExceeded {
                session_id: self.session_id,
                received,
                declared: self.declared_length,
            });
        }

        tracing::trace!(
            reference = %self.reference,
            session_id = %self.session_id,
            index,
            bytes = bytes.len(),
            "Received part"
        );

        self.received = received;
        self.parts.insert(index, bytes);
        Ok(())
    }

    /// Verify the assembled payload against `expected_hash` and finalize it.
    ///
    /// On mismatch nothing is written and [`DistributionError::HashMismatch`]
    /// is returned.
    pub fn close(self, expected_hash: u64) -> Result<PathBuf> {
        let payload = self.assemble()?;

        let actual = codec::content_hash(&payload);
        if actual != expected_hash {
            tracing::warn!(
                reference = %self.reference,
                session_id = %self.session_id,
                expected = format!("{:016x}", expected_hash),
                actual = format!("{:016x}", actual),
                "Content hash mismatch, discarding transfer"
            );
            return Err(DistributionError::HashMismatch {
                reference: self.reference,
                expected: expected_hash,
                actual,
            });
        }

        let path = codec::finalize(&payload, &self.reference, &self.encoding, &self.target_dir)?;

        tracing::debug!(
            reference = %self.reference,
            session_id = %self.session_id,
            bytes = payload.len(),
            elapsed_ms = self.opened_at.elapsed().as_millis() as u64,
            path = %path.display(),
            "Finalized transfer"
        );
        Ok(path)
    }

    fn assemble(&self) -> std::result::Result<Vec<u8>, SessionError> {
        if self.received != self.declared_length {
            return Err(SessionError::Incomplete {
                session_id: self.session_id,
                received: self.received,
                declared: self.declared_length,
            });
        }

        for (expected, index) in self.parts.keys().enumerate() {
            if *index as usize != expected {
                return Err(SessionError::MissingPart {
                    session_id: self.session_id,
                    index: expected as u32,
                });
            }
        }

        let mut payload = Vec::with_capacity(self.declared_length as usize);
        for part in self.parts.values() {
            payload.extend_from_slice(part);
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const CONTENT: &[u8] = b"the quick brown fox jumps over the lazy dog";

    fn open(temp: &TempDir, length: u64) -> ReceiveSession {
        ReceiveSession::open(
            temp.path(),
            SessionId::new(1),
            FileReference::new("ref"),
            ArtifactEncoding::SingleFile {
                name: "file.txt".to_string(),
            },
            length,
        )
    }

    #[test]
    fn test_out_of_order_parts_assemble_by_index() {
        let temp = TempDir::new().unwrap();
        let mut session = open(&temp, CONTENT.len() as u64);

        session.add_part(2, Bytes::copy_from_slice(&CONTENT[20..])).unwrap();
        session.add_part(0, Bytes::copy_from_slice(&CONTENT[..10])).unwrap();
        session.add_part(1, Bytes::copy_from_slice(&CONTENT[10..20])).unwrap();

        let path = session.close(codec::content_hash(CONTENT)).unwrap();
        assert_eq!(fs::read(path).unwrap(), CONTENT);
    }

    #[test]
    fn test_progress() {
        let temp = TempDir::new().unwrap();
        let mut session = open(&temp, 10);
        assert_eq!(session.progress(), 0.0);

        session.add_part(0, Bytes::from_static(b"12345")).unwrap();
        assert_eq!(session.progress(), 0.5);
        assert_eq!(session.received(), 5);
    }

    #[test]
    fn test_duplicate_part_rejected() {
        let temp = TempDir::new().unwrap();
        let mut session = open(&temp, 10);
        session.add_part(0, Bytes::from_static(b"12")).unwrap();

        let err = session.add_part(0, Bytes::from_static(b"34")).unwrap_err();
        assert_eq!(
            err,
            SessionError::DuplicatePart {
                session_id: SessionId::new(1),
                index: 0
            }
        );
        assert_eq!(session.received(), 2);
    }

    #[test]
    fn test_overflow_rejected() {
        let temp = TempDir::new().unwrap();
        let mut session = open(&temp, 3);

        let err = session.add_part(0, Bytes::from_static(b"1234")).unwrap_err();
        assert!(matches!(err, SessionError::LengthExceeded { received: 4, declared: 3, .. }));
    }

    #[test]
    fn test_close_before_all_bytes_fails() {
        let temp = TempDir::new().unwrap();
        let mut session = open(&temp, 10);
        session.add_part(0, Bytes::from_static(b"12345")).unwrap();

        let err = session.close(0).unwrap_err();
        assert!(matches!(
            err,
            DistributionError::Session(SessionError::Incomplete { received: 5, .. })
        ));
        assert!(!temp.path().join("ref").exists());
    }

    #[test]
    fn test_gap_in_indices_fails() {
        let temp = TempDir::new().unwrap();
        let mut session = open(&temp, 4);
        session.add_part(0, Bytes::from_static(b"12")).unwrap();
        session.add_part(2, Bytes::from_static(b"34")).unwrap();

        let err = session.close(0).unwrap_err();
        assert!(matches!(
            err,
            DistributionError::Session(SessionError::MissingPart { index: 1, .. })
        ));
    }

    #[test]
    fn test_wrong_hash_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let mut session = open(&temp, CONTENT.len() as u64);
        session.add_part(0, Bytes::from_static(CONTENT)).unwrap();

        let err = session.close(codec::content_hash(CONTENT) ^ 1).unwrap_err();

        assert!(matches!(err, DistributionError::HashMismatch { .. }));
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_artifact() {
        let temp = TempDir::new().unwrap();
        let session = open(&temp, 0);

        let path = session.close(codec::content_hash(b"")).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"");
    }
}

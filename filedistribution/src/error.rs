//! Error types for file distribution.
//!
//! [`DistributionError`] is what the coordinator and the inbound receiver
//! surface. [`CodecError`] covers artifact finalization and archive packing,
//! and [`SessionError`] covers violations of the chunked push protocol.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CompressionType;
use crate::reference::{FileReference, SessionId};

/// Result type for file distribution operations.
pub type Result<T> = std::result::Result<T, DistributionError>;

/// Result type for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// Errors that can occur while coordinating or receiving downloads.
#[derive(Debug, Error)]
pub enum DistributionError {
    /// The configuration cannot be used (fatal at construction time).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The distribution source does not know the reference.
    #[error("unknown file reference {reference}: {message}")]
    UnknownReference {
        reference: FileReference,
        message: String,
    },

    /// Transport-level failure reaching the distribution source.
    #[error("connection error: {0}")]
    Connection(String),

    /// The time budget for a download was exhausted.
    #[error("timed out downloading {reference} after {attempts} attempt(s)")]
    Timeout {
        reference: FileReference,
        attempts: u32,
    },

    /// Assembled bytes did not hash to the value announced by the source.
    #[error("content hash mismatch for {reference}: expected {expected:016x}, got {actual:016x}")]
    HashMismatch {
        reference: FileReference,
        expected: u64,
        actual: u64,
    },

    /// The source offered a compression type outside the accepted set.
    #[error("unsupported compression {compression} for {reference}")]
    UnsupportedCompression {
        reference: FileReference,
        compression: CompressionType,
    },

    /// The reference is already complete and is not downloaded again.
    #[error("file reference {0} is already downloaded")]
    AlreadyComplete(FileReference),

    /// The source aborted the transfer.
    #[error("transfer of {reference} aborted by source (code {code}): {message}")]
    TransferAborted {
        reference: FileReference,
        code: i32,
        message: String,
    },

    /// The chunked push protocol was violated.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A received frame could not be decoded.
    #[error(transparent)]
    Protocol(#[from] crate::protocol::ProtocolError),

    /// Artifact finalization failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The coordinator has been shut down.
    #[error("file downloader is shut down")]
    ShutDown,
}

/// Violations of the chunked push protocol for a single session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// No open session has this id.
    #[error("no receive session with id {0}")]
    UnknownSession(SessionId),

    /// Another reference already uses this session id.
    #[error("session id {session_id} is already in use by {reference}")]
    SessionIdInUse {
        session_id: SessionId,
        reference: FileReference,
    },

    /// The same part index was delivered twice.
    #[error("part {index} delivered twice for session {session_id}")]
    DuplicatePart { session_id: SessionId, index: u32 },

    /// More bytes arrived than the declared total length.
    #[error("session {session_id} received {received} bytes, declared length is {declared}")]
    LengthExceeded {
        session_id: SessionId,
        received: u64,
        declared: u64,
    },

    /// The session was closed before every expected byte arrived.
    #[error("session {session_id} closed with {received} of {declared} bytes")]
    Incomplete {
        session_id: SessionId,
        received: u64,
        declared: u64,
    },

    /// Part indices are not dense from zero.
    #[error("session {session_id} is missing part {index}")]
    MissingPart { session_id: SessionId, index: u32 },

    /// Another transfer of the reference is already being written to disk.
    #[error("a transfer of {0} is already being finalized")]
    AlreadyFinalizing(FileReference),
}

/// Errors that can occur while materializing or packing artifacts.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file or directory.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Decompressing a payload failed.
    #[error("failed to decompress {compression} payload: {source}")]
    DecompressFailed {
        compression: CompressionType,
        source: io::Error,
    },

    /// Building or reading a tar archive failed.
    #[error("archive error at {}: {source}", path.display())]
    Archive { path: PathBuf, source: io::Error },

    /// An archive entry would land outside the target directory.
    #[error("archive entry {} escapes the target directory", path.display())]
    UnsafeEntry { path: PathBuf },

    /// A name cannot be used as a single path component.
    #[error("invalid artifact name: {0:?}")]
    InvalidName(String),

    /// A compression name was not recognised.
    #[error("unknown compression type: {0:?}")]
    UnknownCompression(String),

    /// An encoding name was not recognised.
    #[error("unknown encoding type: {0:?}")]
    UnknownEncoding(String),
}

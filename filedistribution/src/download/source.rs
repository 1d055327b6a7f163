//! Boundary to the distribution source.
//!
//! The RPC transport and the connection pool behind it live outside this
//! crate. The downloader only needs to ask a source to serve a reference and,
//! after a transport failure, to move on to another connection.

use std::collections::BTreeSet;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::codec::CompressionType;
use crate::reference::FileReference;

/// Status code for an accepted serve-file call.
pub const SERVE_OK: i32 = 0;

/// Status code for a reference the source does not have.
pub const SERVE_NOT_FOUND: i32 = 1;

/// Parameters of a serve-file call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeFileRequest {
    pub reference: FileReference,
    /// Requester tag, for the source's diagnostics.
    pub requester: String,
    pub accepted_compression_types: BTreeSet<CompressionType>,
}

/// Reply to a serve-file call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeFileResponse {
    pub code: i32,
    pub message: String,
}

impl ServeFileResponse {
    /// The source accepted and will push the data.
    pub fn accepted() -> Self {
        Self {
            code: SERVE_OK,
            message: "OK".to_string(),
        }
    }

    /// The source does not know the reference.
    pub fn not_found(reference: &FileReference) -> Self {
        Self {
            code: SERVE_NOT_FOUND,
            message: format!("file reference '{}' not found", reference),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.code == SERVE_OK
    }
}

/// Errors reaching the source.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Transport failure; the call may be retried on another connection.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl From<SourceError> for crate::error::DistributionError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::Connection(message) => Self::Connection(message),
        }
    }
}

/// A distribution source reachable over RPC.
///
/// Accepting a call means the source will push the artifact to this node's
/// [`FileReceiver`](crate::receiver::FileReceiver), typically from another
/// thread, after the call returns.
pub trait FileSource: Send + Sync + 'static {
    /// Ask the source to push `request.reference` to this node.
    fn serve_file<'a>(
        &'a self,
        request: &'a ServeFileRequest,
    ) -> BoxFuture<'a, Result<ServeFileResponse, SourceError>>;

    /// Called after a connection error, before the next attempt.
    fn switch_connection(&self) {}
}

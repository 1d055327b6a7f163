//! Download coordination for file references.
//!
//! This module provides the requesting side of file distribution:
//! - Request coalescing and the downloader facade (`coordinator`)
//! - Shared outcomes for in-flight downloads (`pending`)
//! - Time budget for serve-file retries (`retry`)
//! - The distribution source boundary (`source`)
//! - The in-flight table shared with the receiver (`state`)
//!
//! # Architecture
//!
//! ```text
//! FileDownloader (coordinator)
//!         │
//!         ├── DownloadState (one mutex: pending downloads + sessions)
//!         │       ├── PendingDownload ──► FileFuture (shared by callers)
//!         │       └── DownloadRegistry (status per reference)
//!         │
//!         ├── DownloadTask ──► FileSource::serve_file (retries until Deadline)
//!         │
//!         └── FileReceiver ◄── pushed FileMeta / FilePart / FileEof / FileBlob
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use filedistribution::config::DownloaderConfig;
//! use filedistribution::download::FileDownloader;
//! use filedistribution::reference::DownloadRequest;
//!
//! let downloader = FileDownloader::new(DownloaderConfig::new("/var/lib/fd"), Arc::new(source))?;
//! transport.on_message(downloader.receiver());
//!
//! let jar = downloader
//!     .get_file(DownloadRequest::new("abc", "container-1"), Duration::from_secs(60))
//!     .await;
//! ```

mod coordinator;
mod pending;
mod retry;
mod source;
pub(crate) mod state;

pub use coordinator::FileDownloader;
pub use pending::{ready, DownloadOutcome, FileFuture};
pub use retry::Deadline;
pub use source::{
    FileSource, ServeFileRequest, ServeFileResponse, SourceError, SERVE_NOT_FOUND, SERVE_OK,
};

//! File distribution downloads.
//!
//! Nodes fetch artifacts (files, directory archives, blobs) identified by an
//! opaque [`FileReference`] from a distribution source. The source pushes the
//! artifact back in parts; this crate reassembles it, verifies its XXH64
//! content hash, materializes it under a local download directory and hands
//! the resulting path to every caller that asked for it.
//!
//! # Modules
//!
//! - [`download`]: the [`FileDownloader`] facade, request coalescing and retries
//! - [`receiver`]: inbound push handling and chunk reassembly
//! - [`codec`]: compression, archive packing and artifact finalization
//! - [`registry`]: per-reference download status
//! - [`protocol`]: inbound message types and their binary framing
//! - [`config`]: downloader settings and INI loading
//! - [`logging`]: tracing subscriber setup for binaries

pub mod codec;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod receiver;
pub mod reference;
pub mod registry;

pub use config::DownloaderConfig;
pub use download::{FileDownloader, FileFuture, FileSource};
pub use error::{DistributionError, Result};
pub use receiver::FileReceiver;
pub use reference::{DownloadRequest, FileReference, SessionId};
pub use registry::{DownloadRegistry, DownloadStatus};

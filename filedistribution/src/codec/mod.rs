//! Encoding-aware materialization of artifacts.
//!
//! This module turns verified payload bytes into their final filesystem form:
//! - Single files written verbatim (`encoding`)
//! - Tar archives unpacked, optionally gunzipped (`archive`)
//! - In-memory blobs decompressed and written as one file
//! - XXH64 content hashing (`hash`)
//!
//! Every artifact is staged in a temporary directory inside the download
//! directory and renamed into `<download_dir>/<reference>/` only once it is
//! fully written, so a partially materialized artifact is never visible.

mod archive;
mod encoding;
mod hash;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;

pub use archive::{collect_files, compress, unpack};
pub use encoding::{ArtifactEncoding, CompressionType, EncodingType};
pub use hash::{content_hash, file_content_hash, CONTENT_HASH_SEED};

use crate::error::{CodecError, CodecResult};
use crate::reference::{is_single_component, FileReference};

/// Prefix of staging directories created inside the download directory.
pub const STAGING_PREFIX: &str = ".staging-";

/// Materialize `bytes` for `reference` under `target_dir`.
///
/// An existing, incomplete slot for the reference is replaced.
///
/// # Arguments
///
/// * `bytes` - Verified payload, exactly as transferred
/// * `reference` - Reference the artifact is stored under
/// * `encoding` - How the payload becomes files on disk
/// * `target_dir` - Download directory
///
/// # Returns
///
/// The path of the artifact, `<target_dir>/<reference>/<name>`. It is a file
/// for single files and blobs and a directory for archives.
///
/// # Errors
///
/// Returns `CodecError::InvalidName` if the reference or artifact name is not
/// a single path component, and a decompression, archive or I/O error if the
/// payload cannot be written.
pub fn finalize(
    bytes: &[u8],
    reference: &FileReference,
    encoding: &ArtifactEncoding,
    target_dir: &Path,
) -> CodecResult<PathBuf> {
    if !reference.is_path_safe() {
        return Err(CodecError::InvalidName(reference.value().to_string()));
    }
    if !is_single_component(encoding.name()) {
        return Err(CodecError::InvalidName(encoding.name().to_string()));
    }

    fs::create_dir_all(target_dir).map_err(|e| CodecError::CreateDirFailed {
        path: target_dir.to_path_buf(),
        source: e,
    })?;

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(target_dir)
        .map_err(|e| CodecError::CreateDirFailed {
            path: target_dir.to_path_buf(),
            source: e,
        })?;
    let staged = staging.path().join(encoding.name());

    match encoding {
        ArtifactEncoding::SingleFile { .. } => write_file(&staged, bytes)?,
        ArtifactEncoding::Archive { compression, .. } => {
            let files = archive::unpack(bytes, *compression, &staged)?;
            tracing::debug!(%reference, files, "Unpacked archive");
        }
        ArtifactEncoding::Blob { compression, .. } => {
            let content = decompress(bytes, *compression)?;
            write_file(&staged, &content)?;
        }
    }

    let destination = target_dir.join(reference.value());
    if destination.exists() {
        tracing::debug!(%reference, "Replacing incomplete artifact directory");
        fs::remove_dir_all(&destination).map_err(|e| CodecError::WriteFailed {
            path: destination.clone(),
            source: e,
        })?;
    }

    // The staging TempDir is dropped after the rename; removing a path that
    // no longer exists is a no-op for it.
    fs::rename(staging.path(), &destination).map_err(|e| CodecError::WriteFailed {
        path: destination.clone(),
        source: e,
    })?;

    Ok(destination.join(encoding.name()))
}

/// Find an already materialized artifact for `reference`.
///
/// The reference directory must contain exactly one entry; anything else is
/// treated as absent.
pub fn existing_artifact(reference: &FileReference, target_dir: &Path) -> Option<PathBuf> {
    if !reference.is_path_safe() {
        return None;
    }

    let dir = target_dir.join(reference.value());
    let mut entries = fs::read_dir(&dir).ok()?.filter_map(|e| e.ok());
    let first = entries.next()?;
    if entries.next().is_some() {
        tracing::warn!(
            %reference,
            dir = %dir.display(),
            "More than one entry in artifact directory"
        );
        return None;
    }
    Some(first.path())
}

/// Decompress a payload held in memory.
pub fn decompress(bytes: &[u8], compression: CompressionType) -> CodecResult<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(bytes.to_vec()),
        CompressionType::Gzip => {
            let mut out = Vec::new();
            GzDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(|e| CodecError::DecompressFailed {
                    compression,
                    source: e,
                })?;
            Ok(out)
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> CodecResult<()> {
    fs::write(path, bytes).map_err(|e| CodecError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

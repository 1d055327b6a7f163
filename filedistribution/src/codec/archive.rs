//! Tar archive packing and unpacking.
//!
//! Producers pack a directory into a tar archive (optionally gzip-compressed)
//! and receivers unpack it again. Entries whose path does not fit the classic
//! 100-byte tar name field are written with the GNU long-name extension.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::encoding::CompressionType;
use crate::error::{CodecError, CodecResult};

/// Pack `files` (relative to `source_dir`) into `output_file`.
///
/// Directories listed in `files` are stored as directory entries only; list
/// their contents explicitly or use [`collect_files`].
///
/// # Arguments
///
/// * `source_dir` - Directory the listed paths are relative to
/// * `files` - Relative paths to pack, in archive order
/// * `output_file` - Archive to create; parent directories are created
/// * `compression` - `Gzip` for a `.tar.gz`, `None` for a plain tar
///
/// # Returns
///
/// The path of the written archive.
///
/// # Errors
///
/// Returns `CodecError::UnsafeEntry` for absolute or parent-relative paths
/// and `CodecError::Archive` if an entry cannot be read or written.
pub fn compress(
    source_dir: &Path,
    files: &[PathBuf],
    output_file: &Path,
    compression: CompressionType,
) -> CodecResult<PathBuf> {
    for file in files {
        ensure_relative(file)?;
    }

    if let Some(parent) = output_file.parent() {
        fs::create_dir_all(parent).map_err(|e| CodecError::CreateDirFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let output = File::create(output_file).map_err(|e| CodecError::WriteFailed {
        path: output_file.to_path_buf(),
        source: e,
    })?;
    let writer = BufWriter::new(output);

    let archive_err = |e: io::Error| CodecError::Archive {
        path: output_file.to_path_buf(),
        source: e,
    };

    let mut writer = match compression {
        CompressionType::None => write_tar(writer, source_dir, files).map_err(archive_err)?,
        CompressionType::Gzip => {
            let encoder = GzEncoder::new(writer, Compression::default());
            write_tar(encoder, source_dir, files)
                .and_then(|encoder| encoder.finish())
                .map_err(archive_err)?
        }
    };

    writer.flush().map_err(|e| CodecError::WriteFailed {
        path: output_file.to_path_buf(),
        source: e,
    })?;

    tracing::debug!(
        source = %source_dir.display(),
        output = %output_file.display(),
        files = files.len(),
        %compression,
        "Packed archive"
    );

    Ok(output_file.to_path_buf())
}

/// Unpack an archive held in memory into `target_dir`.
///
/// # Returns
///
/// The number of regular files written.
///
/// # Errors
///
/// Returns `CodecError::UnsafeEntry` if an entry would land outside
/// `target_dir`.
pub fn unpack(bytes: &[u8], compression: CompressionType, target_dir: &Path) -> CodecResult<usize> {
    fs::create_dir_all(target_dir).map_err(|e| CodecError::CreateDirFailed {
        path: target_dir.to_path_buf(),
        source: e,
    })?;

    match compression {
        CompressionType::None => unpack_tar(bytes, target_dir),
        CompressionType::Gzip => unpack_tar(GzDecoder::new(bytes), target_dir),
    }
}

/// List every file and directory below `dir`, relative to it, in sorted order.
pub fn collect_files(dir: &Path) -> CodecResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_recursive(dir, Path::new(""), &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_recursive(root: &Path, relative: &Path, out: &mut Vec<PathBuf>) -> CodecResult<()> {
    let dir = root.join(relative);
    let entries = fs::read_dir(&dir).map_err(|e| CodecError::ReadFailed {
        path: dir.clone(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| CodecError::ReadFailed {
            path: dir.clone(),
            source: e,
        })?;
        let rel = relative.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| CodecError::ReadFailed {
            path: entry.path(),
            source: e,
        })?;

        out.push(rel.clone());
        if file_type.is_dir() {
            collect_recursive(root, &rel, out)?;
        }
    }

    Ok(())
}

fn write_tar<W: Write>(writer: W, source_dir: &Path, files: &[PathBuf]) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.mode(tar::HeaderMode::Deterministic);
    builder.follow_symlinks(false);

    for file in files {
        builder.append_path_with_name(source_dir.join(file), file)?;
    }

    builder.into_inner()
}

fn unpack_tar<R: Read>(reader: R, target_dir: &Path) -> CodecResult<usize> {
    let archive_err = |e: io::Error| CodecError::Archive {
        path: target_dir.to_path_buf(),
        source: e,
    };

    let mut archive = tar::Archive::new(reader);
    let mut files = 0;

    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let path = entry.path().map_err(archive_err)?.into_owned();
        let is_file = entry.header().entry_type().is_file();

        // unpack_in refuses entries that would escape the target directory
        if !entry.unpack_in(target_dir).map_err(archive_err)? {
            return Err(CodecError::UnsafeEntry { path });
        }

        if is_file {
            files += 1;
        }
    }

    Ok(files)
}

fn ensure_relative(path: &Path) -> CodecResult<()> {
    let valid = path.components().count() > 0
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(CodecError::InvalidName(path.display().to_string()))
    }
}

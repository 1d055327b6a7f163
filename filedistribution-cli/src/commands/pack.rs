//! Pack command - build a directory archive as a source would serve it.

use std::path::{Path, PathBuf};

use filedistribution::codec::{self, CompressionType};

use crate::error::CliError;

/// Arguments for the pack command.
pub struct PackArgs {
    pub source: PathBuf,
    pub output: PathBuf,
    pub compression: CompressionType,
}

/// Summary of a packed archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub output: PathBuf,
    pub entries: usize,
    pub bytes: u64,
    pub xxhash: u64,
}

/// Run the pack command.
pub fn run(args: PackArgs) -> Result<(), CliError> {
    let summary = pack(&args.source, &args.output, args.compression)?;
    println!("Packed {} entries into {}", summary.entries, summary.output.display());
    println!("  Size:   {} bytes", summary.bytes);
    println!("  XXH64:  {:016x}", summary.xxhash);
    Ok(())
}

pub fn pack(
    source: &Path,
    output: &Path,
    compression: CompressionType,
) -> Result<PackSummary, CliError> {
    if !source.is_dir() {
        return Err(CliError::Config(format!(
            "{} is not a directory",
            source.display()
        )));
    }

    let files = codec::collect_files(source)?;
    let output = codec::compress(source, &files, output, compression)?;
    let bytes = std::fs::metadata(&output)
        .map_err(|e| CliError::Read {
            path: output.clone(),
            source: e,
        })?
        .len();
    let xxhash = codec::file_content_hash(&output)?;

    tracing::info!(entries = files.len(), bytes, "Archive written");
    Ok(PackSummary {
        output,
        entries: files.len(),
        bytes,
        xxhash,
    })
}

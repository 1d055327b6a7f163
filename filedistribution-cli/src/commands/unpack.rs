//! Unpack command - extract an archive the way the receiver materializes it.

use std::path::{Path, PathBuf};

use filedistribution::codec::{self, CompressionType};

use crate::error::CliError;

/// Arguments for the unpack command.
pub struct UnpackArgs {
    pub archive: PathBuf,
    pub target: PathBuf,
    pub compression: CompressionType,
    /// Expected XXH64 of the archive, hex encoded.
    pub expect_hash: Option<String>,
}

/// Run the unpack command.
pub fn run(args: UnpackArgs) -> Result<(), CliError> {
    let files = unpack(&args.archive, &args.target, args.compression, args.expect_hash.as_deref())?;
    println!("Unpacked {} files into {}", files, args.target.display());
    Ok(())
}

pub fn unpack(
    archive: &Path,
    target: &Path,
    compression: CompressionType,
    expect_hash: Option<&str>,
) -> Result<usize, CliError> {
    let bytes = std::fs::read(archive).map_err(|e| CliError::Read {
        path: archive.to_path_buf(),
        source: e,
    })?;

    if let Some(expected) = expect_hash {
        let expected = super::hash::parse_hex(expected)?;
        let actual = codec::content_hash(&bytes);
        if actual != expected {
            return Err(CliError::Config(format!(
                "hash mismatch for {}: expected {:016x}, got {:016x}",
                archive.display(),
                expected,
                actual
            )));
        }
    }

    Ok(codec::unpack(&bytes, compression, target)?)
}

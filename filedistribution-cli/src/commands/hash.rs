//! Hash command - print the XXH64 content hash sources announce for a file.

use std::path::PathBuf;

use filedistribution::codec;

use crate::error::CliError;

/// Run the hash command.
pub fn run(files: Vec<PathBuf>) -> Result<(), CliError> {
    for file in files {
        let hash = codec::file_content_hash(&file)?;
        println!("{:016x}  {}", hash, file.display());
    }
    Ok(())
}

/// Parse a hex hash, with or without a `0x` prefix.
pub fn parse_hex(value: &str) -> Result<u64, CliError> {
    let digits = value.trim().trim_start_matches("0x");
    u64::from_str_radix(digits, 16)
        .map_err(|_| CliError::Config(format!("invalid hex hash: {:?}", value)))
}

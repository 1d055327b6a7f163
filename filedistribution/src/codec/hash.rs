//! 64-bit content hashing for transfer verification.
//!
//! Sources announce the XXH64 (seed 0) of the assembled payload; receivers
//! recompute it before an artifact is finalized.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use xxhash_rust::xxh64::{xxh64, Xxh64};

use crate::error::{CodecError, CodecResult};

/// Seed used by both ends of the protocol.
pub const CONTENT_HASH_SEED: u64 = 0;

/// Buffer size for reading files during hashing (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Hash a fully assembled payload.
pub fn content_hash(bytes: &[u8]) -> u64 {
    xxh64(bytes, CONTENT_HASH_SEED)
}

/// Hash a file on disk without loading it into memory.
pub fn file_content_hash(path: &Path) -> CodecResult<u64> {
    let mut file = File::open(path).map_err(|e| CodecError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut hasher = Xxh64::new(CONTENT_HASH_SEED);
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer).map_err(|e| CodecError::ReadFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.digest())
}

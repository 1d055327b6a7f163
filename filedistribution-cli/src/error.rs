//! CLI error type.

use std::path::PathBuf;

use filedistribution::error::CodecError;
use filedistribution::logging::LoggingError;
use filedistribution::DistributionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(String),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_)
            | CliError::Distribution(DistributionError::InvalidConfiguration(_)) => 2,
            _ => 1,
        }
    }
}

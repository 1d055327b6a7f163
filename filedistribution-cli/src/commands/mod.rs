//! CLI subcommands.

pub mod config;
pub mod hash;
pub mod pack;
pub mod unpack;

use clap::ValueEnum;
use filedistribution::codec::CompressionType;

/// Compression selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum CompressionArg {
    /// Plain tar
    None,
    /// Gzip-compressed tar
    Gzip,
}

impl From<CompressionArg> for CompressionType {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::None => CompressionType::None,
            CompressionArg::Gzip => CompressionType::Gzip,
        }
    }
}

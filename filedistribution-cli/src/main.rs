//! filedistribution CLI
//!
//! Tooling around the artifacts the downloader receives: pack directories the
//! way a source serves them, unpack and verify archives, compute content
//! hashes and inspect the effective configuration.

mod commands;
mod error;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use filedistribution::logging::{init_logging, DEFAULT_FILTER};

use commands::CompressionArg;
use error::CliError;

#[derive(Parser, Debug)]
#[command(name = "filedistribution", version, about)]
struct Cli {
    /// Log filter, overridden by FILEDISTRIBUTION_LOG
    #[arg(long, global = true, default_value = DEFAULT_FILTER)]
    log_level: String,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pack a directory into an archive
    Pack {
        /// Directory to pack
        source: PathBuf,
        /// Archive to write
        output: PathBuf,
        #[arg(long, value_enum, default_value = "gzip")]
        compression: CompressionArg,
    },
    /// Unpack an archive into a directory
    Unpack {
        archive: PathBuf,
        target: PathBuf,
        #[arg(long, value_enum, default_value = "gzip")]
        compression: CompressionArg,
        /// Fail unless the archive has this XXH64 hash (hex)
        #[arg(long)]
        expect_hash: Option<String>,
    },
    /// Print XXH64 content hashes
    Hash {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show the effective downloader configuration
    Config {
        /// INI file with a [download] section
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let guard = match init_logging(&cli.log_level, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(CliError::from(e).exit_code());
        }
    };

    if let Err(e) = run(cli.command) {
        tracing::debug!(error = ?e, "Command failed");
        eprintln!("Error: {}", e);
        drop(guard);
        process::exit(e.exit_code());
    }
}

fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Pack {
            source,
            output,
            compression,
        } => commands::pack::run(commands::pack::PackArgs {
            source,
            output,
            compression: compression.into(),
        }),
        Commands::Unpack {
            archive,
            target,
            compression,
            expect_hash,
        } => commands::unpack::run(commands::unpack::UnpackArgs {
            archive,
            target,
            compression: compression.into(),
            expect_hash,
        }),
        Commands::Hash { files } => commands::hash::run(files),
        Commands::Config { file } => commands::config::run(file.as_deref()),
    }
}

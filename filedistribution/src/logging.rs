//! Tracing setup for binaries embedding the downloader.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary. [`init_logging`] installs an env-filtered `fmt` subscriber
//! writing to stderr, or to a log file through a non-blocking writer.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{Directive, EnvFilter, ParseError};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Environment variable overriding the filter.
pub const LOG_ENV_VAR: &str = "FILEDISTRIBUTION_LOG";

/// Default filter when none is configured.
pub const DEFAULT_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] ParseError),

    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] TryInitError),

    #[error("invalid log file path: {}", .0.display())]
    InvalidPath(PathBuf),
}

/// Keeps the file writer flushing. Hold it for the life of the process.
pub struct LoggingGuard {
    _worker: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// # Arguments
///
/// * `default_filter` - Filter directives used unless [`LOG_ENV_VAR`] is set
/// * `log_file` - Write events to this file instead of stderr
///
/// # Errors
///
/// Returns `LoggingError::Filter` for unparseable directives and
/// `LoggingError::Init` if a global subscriber is already installed.
pub fn init_logging(
    default_filter: &str,
    log_file: Option<&Path>,
) -> Result<LoggingGuard, LoggingError> {
    let directive: Directive = default_filter.parse()?;
    let filter = EnvFilter::builder()
        .with_default_directive(directive)
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .finish()
            .try_init()?;
        return Ok(LoggingGuard { _worker: None });
    };

    let (dir, file_name) = split_log_path(path)?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, worker) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .finish()
        .try_init()?;

    Ok(LoggingGuard {
        _worker: Some(worker),
    })
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), LoggingError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidPath(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, PathBuf::from(file_name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("/var/log/fd.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/var/log"));
        assert_eq!(name, PathBuf::from("fd.log"));

        let (dir, _) = split_log_path(Path::new("fd.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
    }

    #[test]
    fn test_split_log_path_rejects_directory_only() {
        assert!(matches!(
            split_log_path(Path::new("/")),
            Err(LoggingError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_invalid_default_filter() {
        assert!(matches!(
            init_logging("filedistribution=loud", None),
            Err(LoggingError::Filter(_))
        ));
    }
}

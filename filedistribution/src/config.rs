//! Configuration for the file downloader.
//!
//! Settings can be built in code with the `with_*` methods or read from the
//! `[download]` section of an INI file:
//!
//! ```ini
//! [download]
//! directory = /var/lib/filedistribution
//! timeout_secs = 60
//! retry_sleep_millis = 10000
//! transfer_timeout_secs = 600
//! accepted_compression = gzip
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use serde::Serialize;

use crate::codec::CompressionType;
use crate::error::{DistributionError, Result};

/// INI section holding the downloader settings.
pub const CONFIG_SECTION: &str = "download";

/// Default overall budget for one logical request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default sleep between serve-file attempts after a connection error.
pub const DEFAULT_SLEEP_BETWEEN_RETRIES: Duration = Duration::from_secs(10);

/// Default limit for an accepted transfer to finish.
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration for the file downloader.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloaderConfig {
    /// Directory where artifacts are materialized, one subdirectory per reference.
    pub download_dir: PathBuf,

    /// Budget for issuing serve-file calls, retries included.
    pub timeout: Duration,

    /// Fixed sleep between attempts after a connection error.
    pub sleep_between_retries: Duration,

    /// Time an accepted transfer may take before it is abandoned.
    pub transfer_timeout: Duration,

    /// Compression types this node can decode. Must not be empty.
    pub accepted_compression_types: BTreeSet<CompressionType>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            timeout: DEFAULT_TIMEOUT,
            sleep_between_retries: DEFAULT_SLEEP_BETWEEN_RETRIES,
            transfer_timeout: DEFAULT_TRANSFER_TIMEOUT,
            accepted_compression_types: BTreeSet::from([CompressionType::Gzip]),
        }
    }
}

/// `<cache dir>/filedistribution`, falling back to the temp directory.
pub fn default_download_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("filedistribution")
}

impl DownloaderConfig {
    /// Create a configuration downloading into `download_dir`.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sleep_between_retries(mut self, sleep: Duration) -> Self {
        self.sleep_between_retries = sleep;
        self
    }

    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Replace the accepted compression types.
    pub fn with_accepted_compression_types(
        mut self,
        types: impl IntoIterator<Item = CompressionType>,
    ) -> Self {
        self.accepted_compression_types = types.into_iter().collect();
        self
    }

    /// Whether a payload with `compression` can be decoded here.
    ///
    /// Uncompressed payloads are always accepted.
    pub fn accepts(&self, compression: CompressionType) -> bool {
        !compression.is_compressed() || self.accepted_compression_types.contains(&compression)
    }

    /// Reject configurations the downloader cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.accepted_compression_types.is_empty() {
            return Err(DistributionError::InvalidConfiguration(
                "accepted compression types must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(DistributionError::InvalidConfiguration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(DistributionError::InvalidConfiguration(
                "download directory must be set".to_string(),
            ));
        }
        Ok(())
    }

    /// Load settings from an INI file.
    pub fn from_ini_file(path: &Path) -> Result<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| {
            DistributionError::InvalidConfiguration(format!(
                "failed to load {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_ini(&ini)
    }

    /// Load settings from INI text.
    pub fn from_ini_str(text: &str) -> Result<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| {
            DistributionError::InvalidConfiguration(format!("failed to parse config: {}", e))
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self> {
        let mut config = Self::default();
        let Some(section) = ini.section(Some(CONFIG_SECTION)) else {
            return Ok(config);
        };

        if let Some(dir) = section.get("directory") {
            config.download_dir = PathBuf::from(dir.trim());
        }
        if let Some(value) = section.get("timeout_secs") {
            config.timeout = Duration::from_secs(parse_number("timeout_secs", value)?);
        }
        if let Some(value) = section.get("retry_sleep_millis") {
            config.sleep_between_retries =
                Duration::from_millis(parse_number("retry_sleep_millis", value)?);
        }
        if let Some(value) = section.get("transfer_timeout_secs") {
            config.transfer_timeout =
                Duration::from_secs(parse_number("transfer_timeout_secs", value)?);
        }
        if let Some(value) = section.get("accepted_compression") {
            config.accepted_compression_types = value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse().map_err(|_| {
                        DistributionError::InvalidConfiguration(format!(
                            "unknown compression type in accepted_compression: {:?}",
                            s
                        ))
                    })
                })
                .collect::<Result<_>>()?;
        }

        Ok(config)
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|_| {
        DistributionError::InvalidConfiguration(format!(
            "{} must be a number, got {:?}",
            key, value
        ))
    })
}

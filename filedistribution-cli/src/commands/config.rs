//! Config command - show the effective downloader configuration.

use std::path::Path;

use filedistribution::DownloaderConfig;

use crate::error::CliError;

/// Run the config command.
pub fn run(file: Option<&Path>) -> Result<(), CliError> {
    let config = load(file)?;
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| CliError::Config(format!("failed to render config: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Load and validate the configuration, from `file` or defaults.
pub fn load(file: Option<&Path>) -> Result<DownloaderConfig, CliError> {
    let config = match file {
        Some(path) => DownloaderConfig::from_ini_file(path)?,
        None => DownloaderConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fd.ini");
        std::fs::write(&path, "[download]\ntimeout_secs = 15\n").unwrap();

        let config = load(Some(&path)).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_load_rejects_empty_compression_set() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("fd.ini");
        std::fs::write(&path, "[download]\naccepted_compression =\n").unwrap();

        let err = load(Some(&path)).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

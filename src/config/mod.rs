//! Settings for downloads, the HTTP client and logging
//!
//! Sources are merged lowest to highest: struct defaults, the TOML file,
//! a `.env` file, then process environment. Environment keys use a double
//! underscore between prefix, section and key:
//!
//! ```text
//! INKFETCH__DOWNLOAD__FORMAT=cbz
//! INKFETCH__DOWNLOAD__MAX_CONCURRENT_IMAGES=8
//! INKFETCH__HTTP__MAX_PAGE_SIZE=20MB
//! ```
//!
//! The file is `config/inkfetch.toml` unless `INKFETCH_CONFIG` points
//! elsewhere. A missing file is not an error.
//!
//! ```no_run
//! use inkfetch::config::Config;
//!
//! # fn main() -> Result<(), inkfetch::config::ConfigError> {
//! let config = Config::load()?;
//! let settings = config.to_settings();
//! println!("{} -> {}", settings.format, settings.download_dir.display());
//! # Ok(())
//! # }
//! ```

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{Config, DownloadConfig, HttpSection, LoggingConfig};
pub use sources::config_path;
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Merge every source and validate the result
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Like [`Config::load`] with an explicit file and no `.env` lookup
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Re-check invariants after command-line overrides
    pub fn validate(&self) -> Result<(), ConfigError> {
        validation::validate(self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[download]\nformat = \"pdf\"\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.download.format, crate::model::DownloadFormat::Pdf);
    }

    #[test]
    fn test_validation_catches_zero_limit() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[download]\nmax_concurrent_chapters = 0\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::ZeroLimit { .. })
        ));
    }

    #[test]
    fn test_effective_config_renders() {
        let rendered = Config::default().to_toml().unwrap();
        assert!(rendered.contains("[download]"));
        assert!(rendered.contains("[http.headers]"));
        assert!(rendered.contains("enable_logs = false"));
    }
}

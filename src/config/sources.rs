use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "INKFETCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/inkfetch.toml";
const ENV_PREFIX: &str = "INKFETCH";
const ENV_SEPARATOR: &str = "__";

/// Config file path: `INKFETCH_CONFIG` or the default location
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Read `.env` into the process environment, then merge file and
/// environment over the defaults
pub fn load() -> Result<Config, ConfigError> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    load_from_sources(config_path())
}

/// Merge `config_path` (if present) and `INKFETCH__*` variables
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // INKFETCH__DOWNLOAD__MAX_CONCURRENT_CHAPTERS -> download.max_concurrent_chapters
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::humanize::ByteSize;
    use crate::model::DownloadFormat;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.download.max_concurrent_chapters, 3);
        assert_eq!(config.http.max_page_size, ByteSize::mib(50));
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[download]
format = "cbz"
max_concurrent_chapters = 2
max_concurrent_images = 8
directory = "/tmp/manga"
keep_images = false

[http]
max_page_size = "10MB"
user_agent = "test-agent"

[http.headers]
Referer = "https://example.com/"

[logging]
enable_logs = true
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.download.format, DownloadFormat::Cbz);
        assert_eq!(config.download.max_concurrent_chapters, 2);
        assert_eq!(config.download.max_concurrent_images, 8);
        assert!(!config.download.keep_images);
        assert_eq!(config.download.max_retries, 3);
        assert_eq!(config.http.max_page_size.as_u64(), 10 * 1024 * 1024);
        assert_eq!(config.http.user_agent, "test-agent");
        // Header names are case-insensitive; the loader may fold them
        assert!(
            config
                .http
                .headers
                .iter()
                .any(|(k, v)| k.eq_ignore_ascii_case("referer") && v == "https://example.com/")
        );
        assert!(config.logging.enable_logs);
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("broken.toml");
        fs::write(&config_path, "[download\nformat = ").unwrap();

        assert!(load_from_sources(config_path).is_err());
    }

    #[test]
    fn test_unknown_format_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("format.toml");
        fs::write(&config_path, "[download]\nformat = \"epub\"\n").unwrap();

        assert!(load_from_sources(config_path).is_err());
    }
}

use crate::fetcher::HttpConfig;
use crate::humanize::ByteSize;
use crate::model::{DownloadFormat, DownloadSettings};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Download pipeline settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    #[serde(default)]
    pub format: DownloadFormat,
    #[serde(default = "default_max_concurrent_chapters")]
    pub max_concurrent_chapters: usize,
    #[serde(default = "default_max_concurrent_images")]
    pub max_concurrent_images: usize,
    /// Wait for lazily rendered pages; only meaningful to scraping locators
    #[serde(default = "default_image_load_delay_secs")]
    pub image_load_delay_secs: u64,
    /// Total attempts per page
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_true")]
    pub keep_images: bool,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            format: DownloadFormat::default(),
            max_concurrent_chapters: default_max_concurrent_chapters(),
            max_concurrent_images: default_max_concurrent_images(),
            image_load_delay_secs: default_image_load_delay_secs(),
            max_retries: default_max_retries(),
            directory: default_directory(),
            keep_images: true,
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_max_concurrent_chapters() -> usize {
    3
}

fn default_max_concurrent_images() -> usize {
    5
}

fn default_image_load_delay_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    3
}

fn default_directory() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_true() -> bool {
    true
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// HTTP client settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpSection {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: ByteSize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Sent with every request, e.g. `Referer`
    #[serde(default = "default_headers")]
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            user_agent: default_user_agent(),
            max_page_size: default_max_page_size(),
            proxy: None,
            headers: default_headers(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_user_agent() -> String {
    format!("inkfetch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_headers() -> BTreeMap<String, String> {
    BTreeMap::from([(
        "Accept".to_string(),
        "image/avif,image/webp,image/apng,image/*,*/*;q=0.8".to_string(),
    )])
}

fn default_max_page_size() -> ByteSize {
    ByteSize::mib(50)
}

/// Log output settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub enable_logs: bool,
    /// `EnvFilter` directive used when logs are enabled
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_logs: false,
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "inkfetch=info".to_string()
}

impl Config {
    /// Snapshot of the download settings a job runs with
    pub fn to_settings(&self) -> DownloadSettings {
        let d = &self.download;
        DownloadSettings {
            format: d.format,
            max_concurrent_chapters: d.max_concurrent_chapters,
            max_concurrent_images: d.max_concurrent_images,
            retry: RetryPolicy::new(
                d.max_retries,
                Duration::from_millis(d.retry_backoff_ms),
                Duration::from_millis(d.max_backoff_ms),
            ),
            request_timeout: Duration::from_secs(d.request_timeout_secs),
            download_dir: d.directory.clone(),
            keep_images: d.keep_images,
            image_load_delay: Duration::from_secs(d.image_load_delay_secs),
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            user_agent: self.http.user_agent.clone(),
            headers: self.http.headers.clone(),
            max_page_size: self.http.max_page_size,
            proxy: self.http.proxy.clone(),
        }
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

//! HTTP asset fetcher backed by reqwest

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Proxy};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::{AssetFetcher, FetchError, Result};
use crate::humanize::ByteSize;
use crate::model::{FetchedAsset, PageLocator};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    pub max_page_size: ByteSize,
    pub proxy: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("inkfetch/{}", env!("CARGO_PKG_VERSION")),
            headers: BTreeMap::new(),
            max_page_size: ByteSize::mib(50),
            proxy: None,
        }
    }
}

/// Fetches page assets over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_page_size: ByteSize,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::Transport(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| FetchError::Transport(format!("invalid header value for {}: {}", name.as_str(), e)))?;
            headers.insert(name, value);
        }

        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(url) = &config.proxy {
            let proxy = Proxy::all(url)
                .map_err(|e| FetchError::Transport(format!("invalid proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            max_page_size: config.max_page_size,
        })
    }

    /// Underlying client, shared with the manifest locator
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn fetch_once(&self, url: &str, timeout: Duration) -> Result<FetchedAsset> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::RemoteRejected {
                code: status.as_u16(),
            });
        }

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if let Some(size) = declared {
            self.check_size(size)?;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let bytes = response.bytes().await.map_err(|e| classify(e, timeout))?;
        self.check_size(bytes.len() as u64)?;

        Ok(FetchedAsset {
            bytes,
            content_type,
        })
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_page_size.as_u64() {
            return Err(FetchError::Oversized {
                size: ByteSize(size),
                limit: self.max_page_size,
            });
        }
        Ok(())
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout(timeout)
    } else if let Some(status) = error.status() {
        FetchError::RemoteRejected {
            code: status.as_u16(),
        }
    } else {
        FetchError::Transport(error.to_string())
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, locator: &PageLocator, timeout: Duration) -> Result<FetchedAsset> {
        debug!(url = %locator.url, position = locator.position, "Fetching page");

        // reqwest's timeout covers the body too, this also bounds DNS and
        // connection setup under a stalled resolver
        let asset = tokio::time::timeout(timeout, self.fetch_once(&locator.url, timeout))
            .await
            .map_err(|_| FetchError::Timeout(timeout))??;

        debug!(
            url = %locator.url,
            size = asset.bytes.len(),
            content_type = asset.content_type.as_deref().unwrap_or("-"),
            "Page fetched"
        );
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_page_size, ByteSize::mib(50));
        assert!(config.user_agent.starts_with("inkfetch/"));
    }

    #[test]
    fn test_rejects_invalid_header() {
        let mut config = HttpConfig::default();
        config
            .headers
            .insert("bad header".to_string(), "value".to_string());
        assert!(matches!(
            HttpFetcher::new(&config),
            Err(FetchError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let fetcher = HttpFetcher::new(&HttpConfig::default()).unwrap();
        // Port 9 on localhost: nothing listens there in test environments
        let locator = PageLocator::new("http://127.0.0.1:9/page.jpg", 0);
        let err = fetcher
            .fetch(&locator, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Transport(_) | FetchError::Timeout(_)));
    }
}

//! Asset fetching
//!
//! An [`AssetFetcher`] performs exactly one retrieval attempt per call.
//! Retrying is the caller's job (see [`crate::retry`]) so that every
//! attempt shows up in progress reporting.

pub mod http;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::humanize::ByteSize;
use crate::model::{FetchedAsset, PageLocator};
use crate::retry::Retryable;

pub use http::{HttpConfig, HttpFetcher};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote rejected request with HTTP {code}")]
    RemoteRejected { code: u16 },

    #[error("asset exceeds size limit ({size} > {limit})")]
    Oversized { size: ByteSize, limit: ByteSize },

    #[error("cancelled before the fetch started")]
    Cancelled,
}

impl FetchError {
    /// Short machine-friendly kind, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            FetchError::Transport(_) => "transport",
            FetchError::RemoteRejected { .. } => "remote_rejected",
            FetchError::Oversized { .. } => "oversized",
            FetchError::Cancelled => "cancelled",
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Transport(_) | FetchError::RemoteRejected { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;

/// Retrieves a single page asset
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// One attempt, bounded by `timeout`. Never writes to disk.
    async fn fetch(&self, locator: &PageLocator, timeout: Duration) -> Result<FetchedAsset>;
}

/// File extension for a fetched page
///
/// Content type wins, then the URL path, then `webp`.
pub fn image_extension(content_type: Option<&str>, url: &str) -> &'static str {
    if let Some(ext) = content_type.and_then(extension_from_mime) {
        return ext;
    }

    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    for (suffix, ext) in [
        (".jpg", "jpg"),
        (".jpeg", "jpg"),
        (".png", "png"),
        (".webp", "webp"),
        (".gif", "gif"),
    ] {
        if path.ends_with(suffix) {
            return ext;
        }
    }

    "webp"
}

fn extension_from_mime(content_type: &str) -> Option<&'static str> {
    let media: mime::Mime = content_type.parse().ok()?;
    if media.type_() != mime::IMAGE {
        return None;
    }
    match media.subtype().as_str() {
        "jpeg" | "jpg" | "pjpeg" => Some("jpg"),
        "png" => Some("png"),
        "webp" => Some("webp"),
        "gif" => Some("gif"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_from_content_type() {
        assert_eq!(image_extension(Some("image/jpeg"), "https://x/a"), "jpg");
        assert_eq!(image_extension(Some("image/png; charset=binary"), "https://x/a"), "png");
        assert_eq!(image_extension(Some("image/webp"), "https://x/a.jpg"), "webp");
    }

    #[test]
    fn test_extension_falls_back_to_url() {
        assert_eq!(image_extension(None, "https://x/page.JPEG?token=1"), "jpg");
        assert_eq!(image_extension(Some("application/octet-stream"), "https://x/p.png"), "png");
        assert_eq!(image_extension(Some("not a mime"), "https://x/p.gif#frag"), "gif");
    }

    #[test]
    fn test_extension_default() {
        assert_eq!(image_extension(None, "https://x/api/v2/books/file/123"), "webp");
    }

    #[test]
    fn test_retry_classification() {
        assert!(FetchError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(FetchError::Transport("reset".into()).is_retryable());
        assert!(FetchError::RemoteRejected { code: 503 }.is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
        assert!(
            !FetchError::Oversized {
                size: ByteSize(10),
                limit: ByteSize(5)
            }
            .is_retryable()
        );
    }
}

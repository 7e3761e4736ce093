use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::{debug, info};

use super::{ContentLocator, LocatorError, Result};
use crate::model::{Chapter, PageLocator, Work, WorkMetadata};

/// Work manifest as stored on disk or served over HTTP
#[derive(Debug, Deserialize)]
pub struct WorkManifest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub metadata: WorkMetadata,
    #[serde(default)]
    pub chapters: Vec<ChapterManifest>,
}

#[derive(Debug, Deserialize)]
pub struct ChapterManifest {
    pub id: String,
    pub number: ChapterNumber,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pages: Vec<String>,
}

/// Chapter numbers show up both as `12` and `"12.5"`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ChapterNumber {
    Integer(u64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for ChapterNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChapterNumber::Integer(n) => write!(f, "{}", n),
            ChapterNumber::Float(n) => write!(f, "{}", n),
            ChapterNumber::Text(s) => f.write_str(s),
        }
    }
}

impl WorkManifest {
    pub fn parse(json: &str) -> Result<Self> {
        let manifest: WorkManifest = serde_json::from_str(json)?;
        if manifest.title.trim().is_empty() {
            return Err(LocatorError::InvalidManifest("work title is empty".into()));
        }
        Ok(manifest)
    }
}

/// Locator backed by a JSON work manifest (local file or http(s) URL)
pub struct ManifestLocator {
    client: reqwest::Client,
    /// Chapter id -> page URLs, filled by `list_chapters`
    pages: RwLock<HashMap<String, Vec<String>>>,
}

impl ManifestLocator {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            pages: RwLock::new(HashMap::new()),
        }
    }

    async fn read_manifest(&self, work_ref: &str) -> Result<String> {
        if work_ref.starts_with("http://") || work_ref.starts_with("https://") {
            debug!(url = work_ref, "Fetching manifest");
            let response = self
                .client
                .get(work_ref)
                .send()
                .await
                .map_err(|e| LocatorError::Http(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(LocatorError::Http(format!("{} returned HTTP {}", work_ref, status.as_u16())));
            }
            return response
                .text()
                .await
                .map_err(|e| LocatorError::Http(e.to_string()));
        }

        let path = Path::new(work_ref);
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| LocatorError::Io {
                path: path.to_path_buf(),
                source,
            })
    }
}

#[async_trait]
impl ContentLocator for ManifestLocator {
    async fn list_chapters(&self, work_ref: &str) -> Result<Work> {
        let manifest = WorkManifest::parse(&self.read_manifest(work_ref).await?)?;

        let mut pages = HashMap::with_capacity(manifest.chapters.len());
        let chapters = manifest
            .chapters
            .into_iter()
            .map(|c| {
                pages.insert(c.id.clone(), c.pages);
                Chapter {
                    id: c.id,
                    number: c.number.to_string(),
                    title: c.title,
                    url: c.url,
                    pages: Vec::new(),
                }
            })
            .collect::<Vec<_>>();

        match self.pages.write() {
            Ok(mut cache) => *cache = pages,
            Err(poisoned) => *poisoned.into_inner() = pages,
        }

        info!(work = %manifest.title, chapters = chapters.len(), "Manifest loaded");

        Ok(Work {
            id: manifest.id,
            url: if manifest.url.is_empty() {
                work_ref.to_string()
            } else {
                manifest.url
            },
            title: manifest.title,
            metadata: manifest.metadata,
            chapters,
        })
    }

    async fn list_pages(&self, chapter: &Chapter) -> Result<Vec<PageLocator>> {
        let cache = match self.pages.read() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache
            .get(&chapter.id)
            .map(|urls| PageLocator::sequence(urls.iter().cloned()))
            .ok_or_else(|| LocatorError::ChapterNotFound(chapter.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "id": "w-1",
        "title": "Sample Work",
        "metadata": { "author": "Someone", "genres": ["Drama"], "status": "ONGOING" },
        "chapters": [
            { "id": "c1", "number": 1, "title": "Begin", "pages": ["https://x/1.jpg", "https://x/2.jpg"] },
            { "id": "c2", "number": "1.5", "pages": ["https://x/3.jpg"] }
        ]
    }"#;

    #[tokio::test]
    async fn test_lists_chapters_then_pages() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("work.json");
        std::fs::write(&path, MANIFEST).unwrap();

        let locator = ManifestLocator::new(reqwest::Client::new());
        let work = locator.list_chapters(path.to_str().unwrap()).await.unwrap();

        assert_eq!(work.title, "Sample Work");
        assert_eq!(work.metadata.author.as_deref(), Some("Someone"));
        assert_eq!(work.chapters.len(), 2);
        assert_eq!(work.chapters[1].number, "1.5");
        assert!(work.chapters[0].pages.is_empty());

        let pages = locator.list_pages(&work.chapters[0]).await.unwrap();
        assert_eq!(pages, PageLocator::sequence(["https://x/1.jpg", "https://x/2.jpg"]));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let locator = ManifestLocator::new(reqwest::Client::new());
        let err = locator.list_chapters("/nonexistent/work.json").await.unwrap_err();
        assert!(matches!(err, LocatorError::Io { .. }));
    }

    #[tokio::test]
    async fn test_unknown_chapter() {
        let locator = ManifestLocator::new(reqwest::Client::new());
        let err = locator
            .list_pages(&Chapter::new("nope", "1", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, LocatorError::ChapterNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_rejects_malformed_manifest() {
        assert!(matches!(WorkManifest::parse("{"), Err(LocatorError::Parse(_))));
        assert!(matches!(
            WorkManifest::parse(r#"{"title": "  "}"#),
            Err(LocatorError::InvalidManifest(_))
        ));
    }
}

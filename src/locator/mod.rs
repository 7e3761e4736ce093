//! Content locators: where works, chapters and page URLs come from
//!
//! The download pipeline only ever sees [`PageLocator`]s; discovering them
//! (scraping, APIs, manifests) sits behind [`ContentLocator`].

mod manifest;
mod selection;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

use crate::model::{Chapter, PageLocator, Work};
use crate::progress::{ProgressEvent, ProgressReporter};

pub use manifest::{ChapterManifest, ManifestLocator, WorkManifest};
pub use selection::{ChapterSelection, SelectionError};

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("malformed manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("chapter '{0}' not found")]
    ChapterNotFound(String),
}

pub type Result<T> = std::result::Result<T, LocatorError>;

#[async_trait]
pub trait ContentLocator: Send + Sync {
    /// Resolve a work reference into its metadata and chapter list
    async fn list_chapters(&self, work_ref: &str) -> Result<Work>;

    /// Ordered page locators of one chapter
    async fn list_pages(&self, chapter: &Chapter) -> Result<Vec<PageLocator>>;
}

/// Load a work, bracketed by loading events
pub async fn load_work(
    locator: &dyn ContentLocator,
    work_ref: &str,
    reporter: &dyn ProgressReporter,
) -> Result<Work> {
    reporter.on_event(ProgressEvent::LoadingStarted);

    match locator.list_chapters(work_ref).await {
        Ok(work) => {
            reporter.on_event(ProgressEvent::LoadingProgress(format!(
                "Found {} chapters of {}",
                work.chapters.len(),
                work.title
            )));
            reporter.on_event(ProgressEvent::LoadingFinished);
            Ok(work)
        }
        Err(e) => {
            reporter.on_event(ProgressEvent::LoadingError(e.to_string()));
            Err(e)
        }
    }
}

/// Fill in page lists for the selected chapters
///
/// Chapters that already carry pages are left alone.
pub async fn resolve_selection(
    locator: &dyn ContentLocator,
    work: &mut Work,
    selection: &[usize],
    reporter: &dyn ProgressReporter,
) -> Result<()> {
    reporter.on_event(ProgressEvent::LoadingStarted);
    let total = selection.len();

    for (i, &index) in selection.iter().enumerate() {
        let Some(chapter) = work.chapters.get_mut(index) else {
            warn!(index, "Selection index outside the work, skipping page lookup");
            continue;
        };
        if !chapter.pages.is_empty() {
            continue;
        }

        reporter.on_event(ProgressEvent::LoadingProgress(format!(
            "Loading pages for Ch.{} ({}/{})",
            chapter.number,
            i + 1,
            total
        )));

        match locator.list_pages(chapter).await {
            Ok(pages) => chapter.pages = pages,
            Err(e) => {
                reporter.on_event(ProgressEvent::LoadingError(e.to_string()));
                return Err(e);
            }
        }
    }

    reporter.on_event(ProgressEvent::LoadingFinished);
    Ok(())
}

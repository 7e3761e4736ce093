//! Core data model: works, chapters, page locators, jobs and outcomes

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::convert::ConversionError;
use crate::retry::RetryPolicy;

/// Output format for a chapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    #[default]
    Images,
    Pdf,
    Cbz,
}

impl DownloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFormat::Images => "images",
            DownloadFormat::Pdf => "pdf",
            DownloadFormat::Cbz => "cbz",
        }
    }

    /// Whether the format packages pages into a single file
    pub fn is_packaged(&self) -> bool {
        !matches!(self, DownloadFormat::Images)
    }
}

impl fmt::Display for DownloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DownloadFormat {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "images" | "image" => Ok(DownloadFormat::Images),
            "pdf" => Ok(DownloadFormat::Pdf),
            "cbz" => Ok(DownloadFormat::Cbz),
            other => Err(ConversionError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Descriptive metadata carried into packaged output (e.g. ComicInfo.xml)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMetadata {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub adult: bool,
}

/// A multi-chapter work as returned by a content locator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Work {
    pub id: String,
    pub url: String,
    pub title: String,
    pub metadata: WorkMetadata,
    pub chapters: Vec<Chapter>,
}

impl Work {
    pub fn new(id: impl Into<String>, title: impl Into<String>, chapters: Vec<Chapter>) -> Self {
        Self {
            id: id.into(),
            url: String::new(),
            title: title.into(),
            metadata: WorkMetadata::default(),
            chapters,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub id: String,
    /// Display number, not necessarily an integer ("12.5")
    pub number: String,
    pub title: String,
    pub url: Option<String>,
    pub pages: Vec<PageLocator>,
}

impl Chapter {
    pub fn new(id: impl Into<String>, number: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            number: number.into(),
            title: title.into(),
            url: None,
            pages: Vec::new(),
        }
    }

    /// Attach page URLs; positions follow the iteration order
    pub fn with_pages<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pages = PageLocator::sequence(urls);
        self
    }
}

/// Opaque reference to one page asset plus its position in the chapter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageLocator {
    pub url: String,
    /// 0-based position; the only thing that decides output order
    pub position: usize,
}

impl PageLocator {
    pub fn new(url: impl Into<String>, position: usize) -> Self {
        Self {
            url: url.into(),
            position,
        }
    }

    pub fn sequence<I, S>(urls: I) -> Vec<PageLocator>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        urls.into_iter()
            .enumerate()
            .map(|(position, url)| PageLocator::new(url, position))
            .collect()
    }
}

/// Bytes of one fetched page asset
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

impl FetchedAsset {
    pub fn new(bytes: impl Into<Bytes>, content_type: Option<&str>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.map(str::to_owned),
        }
    }
}

/// A page persisted to a chapter's staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    pub position: usize,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChapterState {
    Pending,
    InProgress,
    Completed,
    Failed,
    PartiallyFailed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal chapter state transition {from:?} -> {to:?}")]
pub struct StateTransitionError {
    pub from: ChapterState,
    pub to: ChapterState,
}

impl ChapterState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChapterState::Completed | ChapterState::Failed | ChapterState::PartiallyFailed
        )
    }

    /// Move forward along Pending -> InProgress -> terminal
    pub fn advance(self, to: ChapterState) -> Result<ChapterState, StateTransitionError> {
        let allowed = match (self, to) {
            (ChapterState::Pending, ChapterState::InProgress) => true,
            (ChapterState::InProgress, next) => next.is_terminal(),
            _ => false,
        };

        if allowed {
            Ok(to)
        } else {
            Err(StateTransitionError { from: self, to })
        }
    }

    /// Classify a finished chapter from its page counts
    pub fn classify(succeeded: usize, total: usize) -> ChapterState {
        if succeeded == 0 {
            ChapterState::Failed
        } else if succeeded == total {
            ChapterState::Completed
        } else {
            ChapterState::PartiallyFailed
        }
    }
}

impl fmt::Display for ChapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChapterState::Pending => "pending",
            ChapterState::InProgress => "in progress",
            ChapterState::Completed => "completed",
            ChapterState::Failed => "failed",
            ChapterState::PartiallyFailed => "partially failed",
        };
        f.write_str(s)
    }
}

/// Snapshot of the settings a job runs with
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSettings {
    pub format: DownloadFormat,
    pub max_concurrent_chapters: usize,
    pub max_concurrent_images: usize,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub download_dir: PathBuf,
    pub keep_images: bool,
    /// Content-locator concern, carried through untouched
    pub image_load_delay: Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            format: DownloadFormat::Images,
            max_concurrent_chapters: 3,
            max_concurrent_images: 5,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            download_dir: PathBuf::from("downloads"),
            keep_images: true,
            image_load_delay: Duration::from_secs(15),
        }
    }
}

/// Unit of work submitted to the orchestrator
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: Uuid,
    pub work: Arc<Work>,
    /// Indices into `work.chapters`
    pub selection: Vec<usize>,
    pub settings: DownloadSettings,
}

impl DownloadJob {
    pub fn new(work: impl Into<Arc<Work>>, selection: Vec<usize>, settings: DownloadSettings) -> Self {
        Self {
            id: Uuid::now_v7(),
            work: work.into(),
            selection,
            settings,
        }
    }

    /// Job over every chapter of the work
    pub fn all_chapters(work: impl Into<Arc<Work>>, settings: DownloadSettings) -> Self {
        let work = work.into();
        let selection = (0..work.chapters.len()).collect();
        Self::new(work, selection, settings)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub position: usize,
    pub reason: String,
}

/// Terminal result for one chapter
#[derive(Debug, Clone)]
pub struct ChapterOutcome {
    pub index: usize,
    pub number: String,
    pub title: String,
    pub state: ChapterState,
    pub pages_total: usize,
    pub pages_succeeded: usize,
    /// Pages that never arrived, by position
    pub failed_pages: Vec<PageFailure>,
    /// Pages dropped during conversion as unreadable
    pub skipped_pages: Vec<PageFailure>,
    /// Pages never fetched because the job was cancelled mid-chapter
    pub cancelled_pages: Vec<usize>,
    pub artifact: Option<PathBuf>,
    /// Chapter-level failure reason (conversion failure, no pages, ...)
    pub error: Option<String>,
    pub bytes_downloaded: u64,
    pub elapsed: Duration,
}

impl ChapterOutcome {
    pub fn label(&self) -> String {
        format!("Ch.{}", self.number)
    }

    /// Cancellation cut the chapter short; it never reached a terminal
    /// state and counts as not attempted
    pub fn is_interrupted(&self) -> bool {
        !self.cancelled_pages.is_empty()
    }

    /// Human-readable failure reason, if the chapter did not complete
    pub fn failure_reason(&self) -> Option<String> {
        if self.state == ChapterState::Completed {
            return None;
        }
        if let Some(error) = &self.error {
            return Some(error.clone());
        }
        let pages = |failures: &[PageFailure]| {
            failures
                .iter()
                .map(|f| (f.position + 1).to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut reasons = Vec::new();
        if !self.failed_pages.is_empty() {
            reasons.push(format!(
                "{}/{} pages failed (pages {})",
                self.failed_pages.len(),
                self.pages_total,
                pages(&self.failed_pages)
            ));
        }
        if !self.skipped_pages.is_empty() {
            reasons.push(format!(
                "{} unreadable pages skipped (pages {})",
                self.skipped_pages.len(),
                pages(&self.skipped_pages)
            ));
        }
        if reasons.is_empty() {
            reasons.push(format!("chapter {}", self.state));
        }
        Some(reasons.join("; "))
    }
}

/// A selected chapter that was never started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotAttempted {
    pub index: usize,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterFailure {
    pub index: usize,
    pub number: String,
    pub state: ChapterState,
    pub reason: String,
}

/// Final tally of a job
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub job_id: Uuid,
    pub work_title: String,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub partially_failed: usize,
    pub cancelled: bool,
    /// Outcomes of every chapter that reached a terminal state, in chapter order
    pub outcomes: Vec<ChapterOutcome>,
    pub not_attempted: Vec<NotAttempted>,
    pub failures: Vec<ChapterFailure>,
    pub bytes_downloaded: u64,
}

impl DownloadSummary {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: Uuid,
        work_title: impl Into<String>,
        started_at: OffsetDateTime,
        elapsed: Duration,
        total: usize,
        mut outcomes: Vec<ChapterOutcome>,
        mut not_attempted: Vec<NotAttempted>,
        cancelled: bool,
    ) -> Self {
        outcomes.sort_by_key(|o| o.index);
        not_attempted.sort_by_key(|n| n.index);

        let count = |state: ChapterState| outcomes.iter().filter(|o| o.state == state).count();
        let succeeded = count(ChapterState::Completed);
        let failed = count(ChapterState::Failed);
        let partially_failed = count(ChapterState::PartiallyFailed);

        let failures = outcomes
            .iter()
            .filter_map(|o| {
                o.failure_reason().map(|reason| ChapterFailure {
                    index: o.index,
                    number: o.number.clone(),
                    state: o.state,
                    reason,
                })
            })
            .collect();
        let bytes_downloaded = outcomes.iter().map(|o| o.bytes_downloaded).sum();

        Self {
            job_id,
            work_title: work_title.into(),
            started_at,
            elapsed,
            total,
            succeeded,
            failed,
            partially_failed,
            cancelled,
            outcomes,
            not_attempted,
            failures,
            bytes_downloaded,
        }
    }

    pub fn not_attempted_count(&self) -> usize {
        self.not_attempted.len()
    }

    /// Chapters that reached any terminal state
    pub fn resolved(&self) -> usize {
        self.succeeded + self.failed + self.partially_failed
    }

    pub fn is_complete_success(&self) -> bool {
        self.total > 0 && self.succeeded == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(index: usize, state: ChapterState) -> ChapterOutcome {
        ChapterOutcome {
            index,
            number: (index + 1).to_string(),
            title: String::new(),
            state,
            pages_total: 4,
            pages_succeeded: if state == ChapterState::Completed { 4 } else { 2 },
            failed_pages: if state == ChapterState::Completed {
                vec![]
            } else {
                vec![
                    PageFailure { position: 1, reason: "timeout".into() },
                    PageFailure { position: 3, reason: "timeout".into() },
                ]
            },
            skipped_pages: vec![],
            cancelled_pages: vec![],
            artifact: None,
            error: None,
            bytes_downloaded: 100,
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_state_transitions_are_monotonic() {
        let state = ChapterState::Pending;
        let state = state.advance(ChapterState::InProgress).unwrap();
        let state = state.advance(ChapterState::PartiallyFailed).unwrap();

        assert!(state.advance(ChapterState::Completed).is_err());
        assert!(state.advance(ChapterState::InProgress).is_err());
        assert!(ChapterState::Pending.advance(ChapterState::Completed).is_err());
        assert!(ChapterState::InProgress.advance(ChapterState::Pending).is_err());
    }

    #[test]
    fn test_classify() {
        assert_eq!(ChapterState::classify(0, 5), ChapterState::Failed);
        assert_eq!(ChapterState::classify(0, 0), ChapterState::Failed);
        assert_eq!(ChapterState::classify(5, 5), ChapterState::Completed);
        assert_eq!(ChapterState::classify(3, 5), ChapterState::PartiallyFailed);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CBZ".parse::<DownloadFormat>().unwrap(), DownloadFormat::Cbz);
        assert_eq!("images".parse::<DownloadFormat>().unwrap(), DownloadFormat::Images);
        assert!("epub".parse::<DownloadFormat>().is_err());
        assert!(DownloadFormat::Pdf.is_packaged());
        assert!(!DownloadFormat::Images.is_packaged());
    }

    #[test]
    fn test_page_sequence_assigns_positions() {
        let chapter = Chapter::new("c", "1", "").with_pages(["a", "b", "c"]);
        let positions: Vec<usize> = chapter.pages.iter().map(|p| p.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(chapter.pages[2].url, "c");
    }

    #[test]
    fn test_summary_counts_and_order() {
        let summary = DownloadSummary::new(
            Uuid::now_v7(),
            "Work",
            OffsetDateTime::now_utc(),
            Duration::from_secs(1),
            5,
            vec![
                outcome(2, ChapterState::PartiallyFailed),
                outcome(0, ChapterState::Completed),
                outcome(1, ChapterState::Failed),
            ],
            vec![
                NotAttempted { index: 4, number: "5".into() },
                NotAttempted { index: 3, number: "4".into() },
            ],
            true,
        );

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.partially_failed, 1);
        assert_eq!(summary.resolved() + summary.not_attempted_count(), summary.total);
        assert_eq!(
            summary.outcomes.iter().map(|o| o.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(summary.not_attempted[0].index, 3);
        assert_eq!(summary.failures.len(), 2);
        assert_eq!(summary.failures[0].reason, "2/4 pages failed (pages 2, 4)");
        assert_eq!(summary.bytes_downloaded, 300);
        assert!(!summary.is_complete_success());
    }
}

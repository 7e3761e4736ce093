//! Chapter downloader
//!
//! Fetches every page of one chapter with bounded parallelism, persists the
//! pages in position order and hands the result to the format converter.
//! Page workers never touch shared state: they send `(position, result)`
//! to the coordinating task, which owns the slot table.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::convert::{self, ComicInfo, ConvertOptions};
use crate::fetcher::{self, AssetFetcher, FetchError};
use crate::layout::{self, ChapterDestination};
use crate::model::{
    Chapter, ChapterOutcome, ChapterState, DownloadSettings, PageFailure, PageFile, PageLocator,
};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::retry::{RetryError, RetryPolicy, run_with_retry};

/// Terminal result of one page
type PageResult = Result<StoredPage, PageError>;

#[derive(Debug)]
enum PageError {
    /// The job was cancelled before the page finished
    Cancelled,
    Failed(String),
}

#[derive(Debug)]
struct StoredPage {
    file: PageFile,
    bytes: u64,
}

/// Everything a page worker needs, shared across the chapter's workers
struct PageContext {
    index: usize,
    fetcher: Arc<dyn AssetFetcher>,
    reporter: Arc<dyn ProgressReporter>,
    retry: RetryPolicy,
    timeout: std::time::Duration,
    dir: PathBuf,
    digits: usize,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ChapterDownloader {
    fetcher: Arc<dyn AssetFetcher>,
    reporter: Arc<dyn ProgressReporter>,
}

impl ChapterDownloader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self { fetcher, reporter }
    }

    /// Download and convert one chapter. Never fails: every problem ends up
    /// in the returned outcome.
    pub async fn download_chapter(
        &self,
        index: usize,
        chapter: &Chapter,
        destination: &ChapterDestination,
        settings: &DownloadSettings,
        comic_info: Option<ComicInfo>,
        cancel: &CancellationToken,
    ) -> ChapterOutcome {
        let started = Instant::now();
        let pages_total = chapter.pages.len();
        let mut outcome = ChapterOutcome {
            index,
            number: chapter.number.clone(),
            title: chapter.title.clone(),
            state: ChapterState::Pending,
            pages_total,
            pages_succeeded: 0,
            failed_pages: Vec::new(),
            skipped_pages: Vec::new(),
            cancelled_pages: Vec::new(),
            artifact: None,
            error: None,
            bytes_downloaded: 0,
            elapsed: Default::default(),
        };

        let state = match ChapterState::Pending.advance(ChapterState::InProgress) {
            Ok(state) => state,
            Err(e) => return self.finish(outcome, ChapterState::Failed, Some(e.to_string()), started),
        };
        outcome.state = state;

        self.reporter.on_event(ProgressEvent::ChapterStarted {
            index,
            number: chapter.number.clone(),
            pages_total,
        });
        info!(chapter = %chapter.number, pages = pages_total, dir = %destination.dir.display(), "Chapter started");

        if pages_total == 0 {
            return self.finish(outcome, ChapterState::Failed, Some("chapter has no pages".into()), started);
        }

        if let Err(e) = tokio::fs::create_dir_all(&destination.dir).await {
            error!(dir = %destination.dir.display(), error = %e, "Cannot create chapter directory");
            return self.finish(
                outcome,
                ChapterState::Failed,
                Some(format!("cannot create {}: {}", destination.dir.display(), e)),
                started,
            );
        }

        let slots = self.fetch_pages(index, chapter, destination, settings, cancel).await;

        let mut stored = Vec::new();
        for (position, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(Ok(page)) => {
                    outcome.bytes_downloaded += page.bytes;
                    stored.push(page.file);
                }
                Some(Err(PageError::Cancelled)) => outcome.cancelled_pages.push(position),
                Some(Err(PageError::Failed(reason))) => outcome.failed_pages.push(PageFailure { position, reason }),
                None => outcome.failed_pages.push(PageFailure {
                    position,
                    reason: "page worker aborted".into(),
                }),
            }
        }
        outcome.pages_succeeded = stored.len();

        // Left in progress: a cancelled chapter was never finished, so it
        // is neither converted nor classified
        if outcome.is_interrupted() {
            outcome.elapsed = started.elapsed();
            info!(
                chapter = %chapter.number,
                pages = outcome.pages_succeeded,
                cancelled = outcome.cancelled_pages.len(),
                "Chapter interrupted by cancellation"
            );
            return outcome;
        }

        let mut final_state = ChapterState::classify(stored.len(), pages_total);
        let mut error = None;

        if stored.is_empty() {
            error = Some("no page could be downloaded".to_string());
        } else {
            match self.convert(stored, pages_total, settings, destination, comic_info).await {
                Ok(conversion) => {
                    if !conversion.skipped.is_empty() && final_state == ChapterState::Completed {
                        final_state = ChapterState::PartiallyFailed;
                    }
                    outcome.artifact = Some(conversion.artifact);
                    outcome.skipped_pages = conversion.skipped;
                }
                Err(reason) => {
                    error!(chapter = %chapter.number, error = %reason, "Chapter conversion failed");
                    final_state = ChapterState::Failed;
                    error = Some(reason);
                }
            }
        }

        self.finish(outcome, final_state, error, started)
    }

    /// Fan out page workers and collect their results by position
    async fn fetch_pages(
        &self,
        index: usize,
        chapter: &Chapter,
        destination: &ChapterDestination,
        settings: &DownloadSettings,
        cancel: &CancellationToken,
    ) -> Vec<Option<PageResult>> {
        let pages_total = chapter.pages.len();
        let context = Arc::new(PageContext {
            index,
            fetcher: self.fetcher.clone(),
            reporter: self.reporter.clone(),
            retry: settings.retry.clone(),
            timeout: settings.request_timeout,
            dir: destination.dir.clone(),
            digits: layout::page_digits(pages_total),
            cancel: cancel.clone(),
        });

        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_images.max(1)));
        let (tx, mut rx) = mpsc::channel::<(usize, PageResult)>(pages_total);
        let mut workers = JoinSet::new();

        for locator in chapter.pages.iter().cloned() {
            let context = context.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();

            workers.spawn(async move {
                let position = locator.position;
                let result = fetch_page(&context, &semaphore, locator).await;
                // The receiver lives until every sender is gone
                let _ = tx.send((position, result)).await;
            });
        }
        drop(tx);

        let mut slots: Vec<Option<PageResult>> = (0..pages_total).map(|_| None).collect();
        let mut completed = 0;

        while let Some((position, result)) = rx.recv().await {
            let Some(slot) = slots.get_mut(position) else {
                warn!(position, pages_total, "Ignoring result for unknown page position");
                continue;
            };
            if slot.is_some() {
                continue;
            }
            *slot = Some(result);
            completed += 1;

            self.reporter.on_event(ProgressEvent::ChapterProgress {
                index,
                pages_completed: completed,
                pages_total,
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(chapter = %chapter.number, error = %e, "Page worker panicked");
            }
        }

        slots
    }

    async fn convert(
        &self,
        pages: Vec<PageFile>,
        pages_total: usize,
        settings: &DownloadSettings,
        destination: &ChapterDestination,
        comic_info: Option<ComicInfo>,
    ) -> Result<convert::Conversion, String> {
        let format = settings.format;
        let destination = destination.clone();
        let options = ConvertOptions {
            keep_images: settings.keep_images || !format.is_packaged(),
            comic_info,
            page_digits: Some(layout::page_digits(pages_total)),
        };

        tokio::task::spawn_blocking(move || convert::convert(&pages, format, &destination, &options))
            .await
            .map_err(|e| format!("conversion task failed: {}", e))?
            .map_err(|e| format!("conversion failed: {}", e))
    }

    fn finish(
        &self,
        mut outcome: ChapterOutcome,
        state: ChapterState,
        error: Option<String>,
        started: Instant,
    ) -> ChapterOutcome {
        outcome.state = match outcome.state.advance(state) {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Invalid chapter state transition");
                ChapterState::Failed
            }
        };
        outcome.error = error;
        outcome.elapsed = started.elapsed();

        info!(
            chapter = %outcome.number,
            state = %outcome.state,
            pages = outcome.pages_succeeded,
            total = outcome.pages_total,
            bytes = outcome.bytes_downloaded,
            "Chapter finished"
        );
        outcome
    }
}

/// Acquire a page permit, fetch with retry and persist the asset
async fn fetch_page(context: &PageContext, semaphore: &Arc<Semaphore>, locator: PageLocator) -> PageResult {
    let position = locator.position;

    let _permit = tokio::select! {
        biased;
        _ = context.cancel.cancelled() => return Err(PageError::Cancelled),
        permit = semaphore.clone().acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Err(PageError::Cancelled),
        },
    };
    if context.cancel.is_cancelled() {
        return Err(PageError::Cancelled);
    }

    let fetched = run_with_retry(
        &context.retry,
        &context.cancel,
        |attempt, error: &FetchError, delay| {
            debug!(position, attempt, kind = error.kind(), "Page attempt failed");
            context.reporter.on_event(ProgressEvent::PageRetrying {
                index: context.index,
                position,
                attempt,
                max_attempts: context.retry.max_attempts,
                delay,
                error: error.to_string(),
            });
        },
        |_| context.fetcher.fetch(&locator, context.timeout),
    )
    .await;

    let asset = match fetched {
        Ok((asset, _attempts)) => asset,
        Err(RetryError::Cancelled { .. }) => return Err(PageError::Cancelled),
        Err(e) => {
            warn!(position, url = %locator.url, attempts = e.attempts(), error = %e, "Page failed");
            return Err(PageError::Failed(e.to_string()));
        }
    };

    let ext = fetcher::image_extension(asset.content_type.as_deref(), &locator.url);
    let path = context
        .dir
        .join(layout::page_file_name(position, context.digits, ext));
    let part = path.with_extension(format!("{}.part", ext));

    let written = async {
        tokio::fs::write(&part, &asset.bytes).await?;
        tokio::fs::rename(&part, &path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&part).await;
        warn!(position, path = %path.display(), error = %e, "Failed to store page");
        return Err(PageError::Failed(format!("failed to write {}: {}", path.display(), e)));
    }

    Ok(StoredPage {
        file: PageFile { position, path },
        bytes: asset.bytes.len() as u64,
    })
}

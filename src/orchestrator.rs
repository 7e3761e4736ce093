//! Download orchestrator
//!
//! Runs a [`DownloadJob`]: validates the selection, schedules chapters under
//! a global concurrency limit and folds chapter outcomes into a
//! [`DownloadSummary`].

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chapter::ChapterDownloader;
use crate::convert::ComicInfo;
use crate::fetcher::AssetFetcher;
use crate::layout;
use crate::model::{
    ChapterOutcome, ChapterState, DownloadFormat, DownloadJob, DownloadSettings, DownloadSummary,
    NotAttempted, Work,
};
use crate::progress::{ProgressEvent, ProgressReporter};

/// Job-level errors, raised before any chapter starts
#[derive(Debug, Error)]
pub enum JobError {
    #[error("no chapters selected")]
    EmptySelection,

    #[error("chapter index {index} is out of range (work has {available} chapters)")]
    InvalidSelection { index: usize, available: usize },

    #[error("cannot create output directory {path}: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub struct DownloadOrchestrator {
    downloader: ChapterDownloader,
    reporter: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
}

impl DownloadOrchestrator {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            downloader: ChapterDownloader::new(fetcher, reporter.clone()),
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that cancels the running job. Cancellation is sticky: a
    /// cancelled orchestrator starts no further chapters.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&self, job: DownloadJob) -> Result<DownloadSummary, JobError> {
        let started_at = OffsetDateTime::now_utc();
        let started = Instant::now();

        let selection = match validate_selection(&job.work, &job.selection) {
            Ok(selection) => selection,
            Err(e) => return Err(self.abort(e)),
        };

        let work_dir = layout::work_dir(&job.settings.download_dir, &job.work);
        if let Err(source) = tokio::fs::create_dir_all(&work_dir).await {
            return Err(self.abort(JobError::DestinationUnwritable {
                path: work_dir,
                source,
            }));
        }

        let total = selection.len();
        info!(
            job_id = %job.id,
            work = %job.work.title,
            chapters = total,
            format = %job.settings.format,
            max_chapters = job.settings.max_concurrent_chapters,
            max_images = job.settings.max_concurrent_images,
            "Download started"
        );
        self.reporter.on_event(ProgressEvent::DownloadStarted {
            work_title: job.work.title.clone(),
            chapters: total,
        });

        let (outcomes, not_attempted) = self
            .schedule(&job.work, selection, Arc::new(job.settings.clone()), work_dir)
            .await;

        let summary = DownloadSummary::new(
            job.id,
            job.work.title.clone(),
            started_at,
            started.elapsed(),
            total,
            outcomes,
            not_attempted,
            self.cancel.is_cancelled(),
        );

        info!(
            job_id = %job.id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            partially_failed = summary.partially_failed,
            not_attempted = summary.not_attempted_count(),
            cancelled = summary.cancelled,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Download finished"
        );
        self.reporter.on_event(ProgressEvent::DownloadFinished {
            succeeded: summary.succeeded,
            total,
        });

        Ok(summary)
    }

    /// Start chapters in sequence order as permits free up, aggregating
    /// outcomes as they arrive.
    async fn schedule(
        &self,
        work: &Arc<Work>,
        selection: Vec<usize>,
        settings: Arc<DownloadSettings>,
        work_dir: PathBuf,
    ) -> (Vec<ChapterOutcome>, Vec<NotAttempted>) {
        let total = selection.len();
        let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_chapters.max(1)));
        let destinations = layout::unique_destinations(&work_dir, work, &selection);
        let mut pending = selection.into_iter().zip(destinations).peekable();
        let mut running: JoinSet<ChapterOutcome> = JoinSet::new();
        let mut in_flight = BTreeSet::new();

        let mut outcomes = Vec::with_capacity(total);
        let mut not_attempted = Vec::new();

        loop {
            let has_pending = pending.peek().is_some();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if has_pending => {
                    warn!(remaining = pending.len(), "Cancellation requested, not starting remaining chapters");
                    not_attempted.extend(pending.by_ref().map(|(index, _)| NotAttempted {
                        index,
                        number: work.chapters[index].number.clone(),
                    }));
                }

                Some(joined) = running.join_next(), if !running.is_empty() => {
                    match joined {
                        Ok(outcome) if outcome.is_interrupted() => {
                            in_flight.remove(&outcome.index);
                            warn!(
                                chapter = %outcome.number,
                                pages = outcome.pages_succeeded,
                                "Chapter interrupted, recording as not attempted"
                            );
                            not_attempted.push(NotAttempted {
                                index: outcome.index,
                                number: outcome.number,
                            });
                        }
                        Ok(outcome) => {
                            in_flight.remove(&outcome.index);
                            self.record(outcome, &mut outcomes, total);
                        }
                        Err(e) => error!(error = %e, "Chapter task panicked"),
                    }
                }

                permit = semaphore.clone().acquire_owned(), if has_pending => {
                    let Ok(permit) = permit else {
                        break;
                    };
                    let Some((index, destination)) = pending.next() else {
                        continue;
                    };

                    let downloader = self.downloader.clone();
                    let work = work.clone();
                    let settings = settings.clone();
                    let cancel = self.cancel.clone();

                    in_flight.insert(index);
                    running.spawn(async move {
                        let _permit = permit;
                        let chapter = &work.chapters[index];
                        let comic_info = (settings.format == DownloadFormat::Cbz)
                            .then(|| ComicInfo::new(&work, chapter));
                        downloader
                            .download_chapter(index, chapter, &destination, &settings, comic_info, &cancel)
                            .await
                    });
                }

                else => break,
            }
        }

        // Chapters whose task died without an outcome
        for index in in_flight {
            let chapter = &work.chapters[index];
            let outcome = ChapterOutcome {
                index,
                number: chapter.number.clone(),
                title: chapter.title.clone(),
                state: ChapterState::Failed,
                pages_total: chapter.pages.len(),
                pages_succeeded: 0,
                failed_pages: Vec::new(),
                skipped_pages: Vec::new(),
                cancelled_pages: Vec::new(),
                artifact: None,
                error: Some("chapter task aborted".into()),
                bytes_downloaded: 0,
                elapsed: Duration::ZERO,
            };
            self.record(outcome, &mut outcomes, total);
        }

        (outcomes, not_attempted)
    }

    fn record(&self, outcome: ChapterOutcome, outcomes: &mut Vec<ChapterOutcome>, total: usize) {
        let message = match outcome.failure_reason() {
            None => format!("{} {}", outcome.label(), outcome.state),
            Some(reason) => format!("{} {}: {}", outcome.label(), outcome.state, reason),
        };

        self.reporter
            .on_event(ProgressEvent::ChapterOutcomeReported(Box::new(outcome.clone())));
        outcomes.push(outcome);
        self.reporter.on_event(ProgressEvent::DownloadProgress {
            current: outcomes.len(),
            total,
            message,
        });
    }

    fn abort(&self, error: JobError) -> JobError {
        error!(error = %error, "Download job rejected");
        self.reporter
            .on_event(ProgressEvent::DownloadError(error.to_string()));
        error
    }
}

/// Reject out-of-range indices, then dedupe and order by chapter sequence
fn validate_selection(work: &Work, selection: &[usize]) -> Result<Vec<usize>, JobError> {
    if selection.is_empty() {
        return Err(JobError::EmptySelection);
    }

    let available = work.chapters.len();
    if let Some(&index) = selection.iter().find(|&&i| i >= available) {
        return Err(JobError::InvalidSelection { index, available });
    }

    let ordered: BTreeSet<usize> = selection.iter().copied().collect();
    Ok(ordered.into_iter().collect())
}

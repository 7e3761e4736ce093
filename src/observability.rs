//! Tracing setup and download counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

use crate::progress::{ProgressEvent, ProgressReporter};

/// Install the global fmt subscriber (stderr)
///
/// `RUST_LOG` wins; otherwise `filter` applies when logs are enabled and
/// only warnings get through when they are not.
pub fn init_tracing(enable_logs: bool, filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if enable_logs {
            EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"))
        } else {
            EnvFilter::new("warn")
        }
    });

    // A subscriber may already be installed (tests, embedding)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Counters fed from the progress event stream
#[derive(Debug, Default)]
pub struct Metrics {
    chapters_completed: AtomicU64,
    chapters_partial: AtomicU64,
    chapters_failed: AtomicU64,
    pages_fetched: AtomicU64,
    page_retries: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chapters_completed: self.chapters_completed.load(Ordering::Relaxed),
            chapters_partial: self.chapters_partial.load(Ordering::Relaxed),
            chapters_failed: self.chapters_failed.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            page_retries: self.page_retries.load(Ordering::Relaxed),
        }
    }
}

impl ProgressReporter for Metrics {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::PageRetrying { .. } => {
                self.page_retries.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(counter = "page_retries", "Metric incremented");
            }
            ProgressEvent::ChapterOutcomeReported(outcome) => {
                use crate::model::ChapterState;

                self.pages_fetched
                    .fetch_add(outcome.pages_succeeded as u64, Ordering::Relaxed);
                let counter = match outcome.state {
                    ChapterState::Completed => &self.chapters_completed,
                    ChapterState::PartiallyFailed => &self.chapters_partial,
                    _ => &self.chapters_failed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub chapters_completed: u64,
    pub chapters_partial: u64,
    pub chapters_failed: u64,
    pub pages_fetched: u64,
    pub page_retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterOutcome, ChapterState};
    use std::time::Duration;

    fn outcome(state: ChapterState, pages: usize) -> ProgressEvent {
        ProgressEvent::ChapterOutcomeReported(Box::new(ChapterOutcome {
            index: 0,
            number: "1".into(),
            title: String::new(),
            state,
            pages_total: 4,
            pages_succeeded: pages,
            failed_pages: vec![],
            skipped_pages: vec![],
            cancelled_pages: vec![],
            artifact: None,
            error: None,
            bytes_downloaded: 0,
            elapsed: Duration::ZERO,
        }))
    }

    #[test]
    fn test_metrics_count_events() {
        let metrics = Metrics::new();
        metrics.on_event(outcome(ChapterState::Completed, 4));
        metrics.on_event(outcome(ChapterState::PartiallyFailed, 2));
        metrics.on_event(outcome(ChapterState::Failed, 0));
        metrics.on_event(ProgressEvent::PageRetrying {
            index: 0,
            position: 1,
            attempt: 1,
            max_attempts: 3,
            delay: Duration::from_secs(1),
            error: "timeout".into(),
        });
        metrics.on_event(ProgressEvent::LoadingStarted);

        assert_eq!(
            metrics.snapshot(),
            MetricsSnapshot {
                chapters_completed: 1,
                chapters_partial: 1,
                chapters_failed: 1,
                pages_fetched: 6,
                page_retries: 1,
            }
        );
    }
}

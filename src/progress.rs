//! Progress events and reporter sinks
//!
//! The pipeline pushes immutable [`ProgressEvent`] values into a
//! [`ProgressReporter`]. Reporters must return quickly: the pipeline never
//! waits on them.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::model::ChapterOutcome;

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    LoadingStarted,
    LoadingProgress(String),
    LoadingFinished,
    LoadingError(String),
    DownloadStarted {
        work_title: String,
        chapters: usize,
    },
    /// Emitted after each chapter resolves
    DownloadProgress {
        current: usize,
        total: usize,
        message: String,
    },
    ChapterStarted {
        index: usize,
        number: String,
        pages_total: usize,
    },
    /// Emitted after each page reaches a terminal result
    ChapterProgress {
        index: usize,
        pages_completed: usize,
        pages_total: usize,
    },
    PageRetrying {
        index: usize,
        position: usize,
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        error: String,
    },
    ChapterOutcomeReported(Box<ChapterOutcome>),
    DownloadFinished {
        succeeded: usize,
        total: usize,
    },
    DownloadError(String),
}

/// Sink for progress events, implemented by the presentation layer
pub trait ProgressReporter: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

impl<R: ProgressReporter + ?Sized> ProgressReporter for Arc<R> {
    fn on_event(&self, event: ProgressEvent) {
        (**self).on_event(event)
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_event(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel
///
/// Sending never blocks; if the receiver is gone the event is dropped.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_event(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            debug!("Progress receiver dropped, event discarded");
        }
    }
}

/// Mirrors events into the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::LoadingStarted => info!("Loading work"),
            ProgressEvent::LoadingProgress(message) => info!(%message, "Loading"),
            ProgressEvent::LoadingFinished => info!("Work loaded"),
            ProgressEvent::LoadingError(reason) => error!(%reason, "Loading failed"),
            ProgressEvent::DownloadStarted {
                work_title,
                chapters,
            } => info!(%work_title, chapters, "Download started"),
            ProgressEvent::DownloadProgress {
                current,
                total,
                message,
            } => info!(current, total, %message, "Download progress"),
            ProgressEvent::ChapterStarted {
                index,
                number,
                pages_total,
            } => debug!(index, %number, pages_total, "Chapter started"),
            ProgressEvent::ChapterProgress {
                index,
                pages_completed,
                pages_total,
            } => debug!(index, pages_completed, pages_total, "Chapter progress"),
            ProgressEvent::PageRetrying {
                index,
                position,
                attempt,
                max_attempts,
                delay,
                error,
            } => warn!(
                index,
                position,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                %error,
                "Page fetch failed, retrying"
            ),
            ProgressEvent::ChapterOutcomeReported(outcome) => info!(
                chapter = %outcome.number,
                state = %outcome.state,
                pages = outcome.pages_succeeded,
                total = outcome.pages_total,
                "Chapter resolved"
            ),
            ProgressEvent::DownloadFinished { succeeded, total } => {
                info!(succeeded, total, "Download finished")
            }
            ProgressEvent::DownloadError(reason) => error!(%reason, "Download aborted"),
        }
    }
}

/// Sends every event to each inner reporter in order
pub struct FanoutReporter {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl FanoutReporter {
    pub fn new(reporters: Vec<Box<dyn ProgressReporter>>) -> Self {
        Self { reporters }
    }
}

impl ProgressReporter for FanoutReporter {
    fn on_event(&self, event: ProgressEvent) {
        if let Some((last, rest)) = self.reporters.split_last() {
            for reporter in rest {
                reporter.on_event(event.clone());
            }
            last.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_reporter_preserves_order() {
        let (reporter, mut rx) = ChannelReporter::new();
        reporter.on_event(ProgressEvent::LoadingStarted);
        reporter.on_event(ProgressEvent::LoadingProgress("chapter list".into()));
        reporter.on_event(ProgressEvent::LoadingFinished);
        drop(reporter);

        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            seen.push(event);
        }
        assert_eq!(seen.len(), 3);
        assert!(matches!(seen[0], ProgressEvent::LoadingStarted));
        assert!(matches!(&seen[1], ProgressEvent::LoadingProgress(m) if m == "chapter list"));
        assert!(matches!(seen[2], ProgressEvent::LoadingFinished));
    }

    #[test]
    fn test_channel_reporter_survives_dropped_receiver() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.on_event(ProgressEvent::DownloadFinished {
            succeeded: 1,
            total: 1,
        });
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_all() {
        let (a, mut rx_a) = ChannelReporter::new();
        let (b, mut rx_b) = ChannelReporter::new();
        let fanout = FanoutReporter::new(vec![Box::new(a), Box::new(b), Box::new(NoopReporter)]);

        fanout.on_event(ProgressEvent::DownloadError("boom".into()));

        assert!(matches!(rx_a.recv().await, Some(ProgressEvent::DownloadError(_))));
        assert!(matches!(rx_b.recv().await, Some(ProgressEvent::DownloadError(_))));
    }
}

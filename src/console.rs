//! Plain stdout rendering of progress events and the final summary

use inkfetch::humanize::{ByteSize, format_duration};
use inkfetch::model::{ChapterState, DownloadSummary, Work};
use inkfetch::observability::MetricsSnapshot;
use inkfetch::progress::{ProgressEvent, ProgressReporter};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct ConsoleReporter {
    /// Chapter index -> display number, learned from `ChapterStarted`
    numbers: Mutex<HashMap<usize, String>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn number(&self, index: usize) -> String {
        self.numbers
            .lock()
            .ok()
            .and_then(|n| n.get(&index).cloned())
            .unwrap_or_else(|| (index + 1).to_string())
    }
}

impl ProgressReporter for ConsoleReporter {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::LoadingStarted => {}
            ProgressEvent::LoadingProgress(message) => println!("  {}", message),
            ProgressEvent::LoadingFinished => {}
            ProgressEvent::LoadingError(reason) => eprintln!("Loading failed: {}", reason),
            ProgressEvent::DownloadStarted {
                work_title,
                chapters,
            } => println!("Downloading {} chapter(s) of {}", chapters, work_title),
            ProgressEvent::ChapterStarted {
                index,
                number,
                pages_total,
            } => {
                println!("[Ch.{}] {} pages", number, pages_total);
                if let Ok(mut numbers) = self.numbers.lock() {
                    numbers.insert(index, number);
                }
            }
            ProgressEvent::ChapterProgress {
                index,
                pages_completed,
                pages_total,
            } => {
                if pages_completed == pages_total {
                    println!("[Ch.{}] all {} pages fetched", self.number(index), pages_total);
                }
            }
            ProgressEvent::PageRetrying {
                index,
                position,
                attempt,
                max_attempts,
                delay,
                error,
            } => println!(
                "[Ch.{}] page {}: attempt {}/{} failed ({}), retrying in {}",
                self.number(index),
                position + 1,
                attempt,
                max_attempts,
                error,
                format_duration(delay)
            ),
            ProgressEvent::ChapterOutcomeReported(outcome) => {
                let tag = match outcome.state {
                    ChapterState::Completed => "done",
                    ChapterState::PartiallyFailed => "partial",
                    _ => "failed",
                };
                match outcome.failure_reason() {
                    None => println!(
                        "[{}] {} ({} pages, {}, {})",
                        tag,
                        outcome.label(),
                        outcome.pages_succeeded,
                        ByteSize(outcome.bytes_downloaded),
                        format_duration(outcome.elapsed)
                    ),
                    Some(reason) => println!("[{}] {}: {}", tag, outcome.label(), reason),
                }
            }
            ProgressEvent::DownloadProgress { current, total, .. } => {
                println!("Progress: {}/{} chapters", current, total)
            }
            ProgressEvent::DownloadFinished { .. } => {}
            ProgressEvent::DownloadError(reason) => eprintln!("Download aborted: {}", reason),
        }
    }
}

pub fn print_work(work: &Work) {
    println!("{}", work.title);
    if let Some(author) = &work.metadata.author {
        println!("  by {}", author);
    }
    if let Some(status) = &work.metadata.status {
        println!("  status: {}", status);
    }
    if !work.metadata.genres.is_empty() {
        println!("  genres: {}", work.metadata.genres.join(", "));
    }
    println!();
    println!("{} chapter(s):", work.chapters.len());
    for (i, chapter) in work.chapters.iter().enumerate() {
        if chapter.title.is_empty() {
            println!("  {:>4}. Ch.{}", i + 1, chapter.number);
        } else {
            println!("  {:>4}. Ch.{} {}", i + 1, chapter.number, chapter.title);
        }
    }
}

pub fn print_summary(summary: &DownloadSummary, metrics: &MetricsSnapshot) {
    println!();
    println!(
        "{}: {}/{} chapter(s) completed in {} ({} downloaded, {} page retries)",
        summary.work_title,
        summary.succeeded,
        summary.total,
        format_duration(summary.elapsed),
        ByteSize(summary.bytes_downloaded),
        metrics.page_retries
    );

    if summary.partially_failed > 0 || summary.failed > 0 {
        println!(
            "  {} partially failed, {} failed:",
            summary.partially_failed, summary.failed
        );
        for failure in &summary.failures {
            println!("    Ch.{} ({}): {}", failure.number, failure.state, failure.reason);
        }
    }

    if !summary.not_attempted.is_empty() {
        let numbers: Vec<&str> = summary
            .not_attempted
            .iter()
            .map(|n| n.number.as_str())
            .collect();
        println!("  not attempted (cancelled): Ch.{}", numbers.join(", Ch."));
    }

    for outcome in &summary.outcomes {
        if let Some(artifact) = &outcome.artifact {
            println!("  {} -> {}", outcome.label(), artifact.display());
        }
    }
}

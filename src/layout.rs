//! On-disk output layout
//!
//! ```text
//! <download_dir>/<work title>/<chapter label>/001.jpg
//!                                            /<chapter label>.pdf
//!                                            /<chapter label>.cbz
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::model::{Chapter, Work};

pub const WORK_TITLE_MAX_LEN: usize = 50;
pub const CHAPTER_LABEL_MAX_LEN: usize = 80;

/// Minimum digits used for page file names
const MIN_PAGE_DIGITS: usize = 3;

/// Make a string safe to use as a single path component on every platform
pub fn sanitize_filename(name: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' | '~' | '[' | ']' | '{'
            | '}' => '_',
            c if c.is_control() => '_',
            c => c,
        };
        // Collapse runs of underscores
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let mut sanitized = out.trim_matches(|c| c == ' ' || c == '_').to_string();

    if sanitized.chars().count() > max_len {
        sanitized = sanitized.chars().take(max_len).collect();
        sanitized = sanitized.trim_end_matches([' ', '_']).to_string();
    }

    if sanitized.is_empty() {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// Directory label for a chapter, e.g. `Chapter_12_The Return`
pub fn chapter_label(chapter: &Chapter) -> String {
    let raw = if chapter.title.trim().is_empty() {
        format!("Chapter_{}", chapter.number)
    } else {
        format!("Chapter_{}_{}", chapter.number, chapter.title)
    };
    sanitize_filename(&raw, CHAPTER_LABEL_MAX_LEN)
}

pub fn work_dir(download_dir: &Path, work: &Work) -> PathBuf {
    download_dir.join(sanitize_filename(&work.title, WORK_TITLE_MAX_LEN))
}

/// Zero-padding width for a chapter with `total` pages
pub fn page_digits(total: usize) -> usize {
    total.to_string().len().max(MIN_PAGE_DIGITS)
}

/// File name for the page at 0-based `position`: `001.jpg`, `002.jpg`, ...
pub fn page_file_name(position: usize, digits: usize, ext: &str) -> String {
    format!("{:0width$}.{}", position + 1, ext, width = digits)
}

/// Where one chapter's pages and artifact live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterDestination {
    pub dir: PathBuf,
    pub label: String,
}

impl ChapterDestination {
    pub fn new(work_dir: &Path, chapter: &Chapter) -> Self {
        Self::with_label(work_dir, chapter_label(chapter))
    }

    fn with_label(work_dir: &Path, label: String) -> Self {
        Self {
            dir: work_dir.join(&label),
            label,
        }
    }

    /// Path of a packaged artifact (`pdf`/`cbz`) for this chapter
    pub fn artifact_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.label, extension))
    }
}

/// One destination per selected chapter, in selection order
///
/// Chapters that sanitize to the same label (ignoring case, for
/// case-insensitive filesystems) get `_2`, `_3`, ... appended in order.
pub fn unique_destinations(work_dir: &Path, work: &Work, selection: &[usize]) -> Vec<ChapterDestination> {
    let mut taken = HashSet::new();
    selection
        .iter()
        .map(|&index| {
            let base = chapter_label(&work.chapters[index]);
            let mut label = base.clone();
            let mut n = 1;
            while !taken.insert(label.to_lowercase()) {
                n += 1;
                label = format!("{}_{}", base, n);
            }
            ChapterDestination::with_label(work_dir, label)
        })
        .collect()
}

//! Format conversion of a chapter's downloaded pages
//!
//! Conversion is synchronous and CPU/disk bound; async callers run it on the
//! blocking pool. Packaged artifacts are written to `<artifact>.part` and
//! renamed into place, so a reader never sees a half-written file.

mod cbz;
mod comic_info;
mod images;
mod pdf;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::layout::{self, ChapterDestination};
use crate::model::{DownloadFormat, PageFailure, PageFile};

pub use comic_info::ComicInfo;

#[derive(Debug, Error)]
pub enum ConversionError {
    /// A single page could not be decoded; never aborts a conversion
    #[error("page {position} is unreadable: {reason}")]
    CorruptSource { position: usize, reason: String },

    #[error("failed to write {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no usable pages to convert")]
    NoUsablePages,

    #[error("unsupported format '{0}', expected one of: images, pdf, cbz")]
    UnsupportedFormat(String),
}

impl ConversionError {
    pub(crate) fn write(path: &Path, source: io::Error) -> Self {
        ConversionError::WriteFailure {
            path: path.to_path_buf(),
            source,
        }
    }

    fn into_page_failure(self, position: usize) -> PageFailure {
        PageFailure {
            position,
            reason: self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;

#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Keep page images next to a packaged artifact
    pub keep_images: bool,
    /// Metadata embedded into CBZ archives
    pub comic_info: Option<ComicInfo>,
    /// Zero-padding width of page names; derived from the highest page
    /// position when unset
    pub page_digits: Option<usize>,
}

/// Result of a successful conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    /// Chapter directory for `images`, the packaged file otherwise
    pub artifact: PathBuf,
    /// Pages left out because they could not be decoded
    pub skipped: Vec<PageFailure>,
}

/// Turn an ordered page set into the requested output format
pub fn convert(
    pages: &[PageFile],
    format: DownloadFormat,
    destination: &ChapterDestination,
    options: &ConvertOptions,
) -> Result<Conversion> {
    if pages.is_empty() {
        return Err(ConversionError::NoUsablePages);
    }

    let mut ordered = pages.to_vec();
    ordered.sort_by_key(|p| p.position);

    let digits = options.page_digits.unwrap_or_else(|| {
        layout::page_digits(ordered.last().map_or(0, |p| p.position + 1))
    });

    debug!(
        chapter = %destination.label,
        format = %format,
        pages = ordered.len(),
        "Converting chapter"
    );

    match format {
        DownloadFormat::Images => images::collect(&ordered, destination, digits),
        DownloadFormat::Pdf => {
            let artifact = destination.artifact_path("pdf");
            let skipped = write_atomically(&artifact, |file| pdf::write(&ordered, &destination.label, file))?;
            finish(&ordered, artifact, skipped, options)
        }
        DownloadFormat::Cbz => {
            let artifact = destination.artifact_path("cbz");
            let skipped = write_atomically(&artifact, |file| {
                cbz::write(&ordered, options.comic_info.as_ref(), digits, file)
            })?;
            finish(&ordered, artifact, skipped, options)
        }
    }
}

fn finish(
    pages: &[PageFile],
    artifact: PathBuf,
    skipped: Vec<PageFailure>,
    options: &ConvertOptions,
) -> Result<Conversion> {
    if !options.keep_images {
        remove_sources(pages, &skipped);
    }
    Ok(Conversion { artifact, skipped })
}

/// Write through `<path>.part`, then rename over `path`
///
/// The partial file is removed on any failure.
fn write_atomically<T, F>(path: &Path, write: F) -> Result<T>
where
    F: FnOnce(&mut io::BufWriter<fs::File>) -> Result<T>,
{
    let part = part_path(path);

    let outcome = (|| {
        let file = fs::File::create(&part).map_err(|e| ConversionError::write(&part, e))?;
        let mut writer = io::BufWriter::new(file);
        let value = write(&mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| ConversionError::write(&part, e.into_error()))?;
        file.sync_all().map_err(|e| ConversionError::write(&part, e))?;
        fs::rename(&part, path).map_err(|e| ConversionError::write(path, e))?;
        Ok(value)
    })();

    if outcome.is_err() && part.exists() {
        if let Err(e) = fs::remove_file(&part) {
            warn!(path = %part.display(), error = %e, "Failed to remove partial artifact");
        }
    }
    outcome
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Delete packaged sources; skipped pages are not in the artifact and stay
fn remove_sources(pages: &[PageFile], skipped: &[PageFailure]) {
    let packaged = pages
        .iter()
        .filter(|page| !skipped.iter().any(|s| s.position == page.position));
    for page in packaged {
        if let Err(e) = fs::remove_file(&page.path) {
            warn!(path = %page.path.display(), error = %e, "Failed to remove source page");
        }
    }
}

/// Decode a page into pixels, mapping any failure to `CorruptSource`
pub(crate) fn decode_page(page: &PageFile) -> Result<image::DynamicImage> {
    let bytes = fs::read(&page.path).map_err(|e| ConversionError::CorruptSource {
        position: page.position,
        reason: e.to_string(),
    })?;
    image::load_from_memory(&bytes).map_err(|e| ConversionError::CorruptSource {
        position: page.position,
        reason: e.to_string(),
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::{png_bytes, write_page};
    use super::*;
    use crate::model::Chapter;

    fn destination(root: &Path) -> ChapterDestination {
        let dest = ChapterDestination::new(root, &Chapter::new("c1", "7", "Night"));
        fs::create_dir_all(&dest.dir).unwrap();
        dest
    }

    #[test]
    fn test_empty_page_set_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = destination(tmp.path());
        let result = convert(&[], DownloadFormat::Cbz, &dest, &ConvertOptions::default());
        assert!(matches!(result, Err(ConversionError::NoUsablePages)));
    }

    #[test]
    fn test_keep_images_false_removes_sources_after_success() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = destination(tmp.path());
        let pages: Vec<PageFile> = (0..3)
            .map(|i| write_page(&dest.dir, i, &png_bytes(4, 4, i as u8 * 40), "png"))
            .collect();

        let options = ConvertOptions {
            keep_images: false,
            comic_info: None,
            page_digits: None,
        };
        let conversion = convert(&pages, DownloadFormat::Cbz, &dest, &options).unwrap();

        assert!(conversion.artifact.exists());
        assert!(!part_path(&conversion.artifact).exists());
        for page in &pages {
            assert!(!page.path.exists(), "{} should be removed", page.path.display());
        }
    }

    #[test]
    fn test_keep_images_true_leaves_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = destination(tmp.path());
        let pages = vec![write_page(&dest.dir, 0, &png_bytes(4, 4, 0), "png")];

        let options = ConvertOptions {
            keep_images: true,
            comic_info: None,
            page_digits: None,
        };
        convert(&pages, DownloadFormat::Pdf, &dest, &options).unwrap();
        assert!(pages[0].path.exists());
    }

    #[test]
    fn test_failed_write_keeps_sources_and_cleans_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = destination(tmp.path());
        let pages: Vec<PageFile> = (0..2)
            .map(|i| write_page(&dest.dir, i, &png_bytes(4, 4, 10), "png"))
            .collect();

        // A directory squatting on the artifact path makes the rename fail
        let artifact = dest.artifact_path("cbz");
        fs::create_dir_all(artifact.join("occupied")).unwrap();

        let options = ConvertOptions {
            keep_images: false,
            comic_info: None,
            page_digits: None,
        };
        let result = convert(&pages, DownloadFormat::Cbz, &dest, &options);

        assert!(matches!(result, Err(ConversionError::WriteFailure { .. })));
        assert!(!part_path(&artifact).exists());
        for page in &pages {
            assert!(page.path.exists());
        }
    }

    #[test]
    fn test_skipped_pages_survive_source_cleanup() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = destination(tmp.path());
        let pages = vec![
            write_page(&dest.dir, 0, &png_bytes(4, 4, 0), "png"),
            write_page(&dest.dir, 1, b"not an image", "jpg"),
            write_page(&dest.dir, 2, &png_bytes(4, 4, 90), "png"),
        ];

        let options = ConvertOptions {
            keep_images: false,
            ..Default::default()
        };
        let conversion = convert(&pages, DownloadFormat::Pdf, &dest, &options).unwrap();

        assert_eq!(conversion.skipped.len(), 1);
        assert!(!pages[0].path.exists());
        assert!(pages[1].path.exists(), "unreadable page is the only copy");
        assert!(!pages[2].path.exists());
    }

    #[test]
    fn test_page_digits_follow_the_chapter_not_the_survivors() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = destination(tmp.path());
        let pages = vec![
            write_page(&dest.dir, 0, b"one", "jpg"),
            write_page(&dest.dir, 1, b"two", "jpg"),
        ];

        // The chapter had 1000+ pages even though only two arrived
        let options = ConvertOptions {
            keep_images: true,
            page_digits: Some(4),
            ..Default::default()
        };
        let conversion = convert(&pages, DownloadFormat::Cbz, &dest, &options).unwrap();

        let file = fs::File::open(&conversion.artifact).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["0001.jpg", "0002.jpg"]);
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/a/Chapter_1.cbz")),
            PathBuf::from("/a/Chapter_1.cbz.part")
        );
    }
}

use std::fs;
use std::io::{Seek, Write};
use tracing::warn;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use super::{ComicInfo, ConversionError, Result};
use crate::layout;
use crate::model::{PageFailure, PageFile};

const COMIC_INFO_ENTRY: &str = "ComicInfo.xml";

/// Fixed timestamp and permissions keep archives byte-identical across runs
fn entry_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Pack `pages` (already in position order) into a CBZ archive
pub(super) fn write<W: Write + Seek>(
    pages: &[PageFile],
    comic_info: Option<&ComicInfo>,
    digits: usize,
    target: W,
) -> Result<Vec<PageFailure>> {
    let mut skipped = Vec::new();
    let mut entries = Vec::with_capacity(pages.len());

    for page in pages {
        match fs::read(&page.path) {
            Ok(bytes) => entries.push((page, bytes)),
            Err(e) => {
                warn!(position = page.position, error = %e, "Skipping unreadable page");
                skipped.push(
                    ConversionError::CorruptSource {
                        position: page.position,
                        reason: e.to_string(),
                    }
                    .into_page_failure(page.position),
                );
            }
        }
    }

    if entries.is_empty() {
        return Err(ConversionError::NoUsablePages);
    }

    let mut zip = ZipWriter::new(target);
    let options = entry_options();

    if let Some(info) = comic_info {
        zip.start_file(COMIC_INFO_ENTRY, options).map_err(zip_error)?;
        zip.write_all(info.to_xml(entries.len()).as_bytes())
            .map_err(|e| zip_error(e.into()))?;
    }

    for (page, bytes) in &entries {
        let ext = page
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "webp".to_string());
        let name = layout::page_file_name(page.position, digits, &ext);

        zip.start_file(name, options).map_err(zip_error)?;
        zip.write_all(bytes).map_err(|e| zip_error(e.into()))?;
    }

    zip.finish().map_err(zip_error)?;
    Ok(skipped)
}

fn zip_error(e: zip::result::ZipError) -> ConversionError {
    let source = match e {
        zip::result::ZipError::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    };
    ConversionError::WriteFailure {
        path: "<cbz archive>".into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::test_support::{png_bytes, write_page};
    use crate::model::{Chapter, Work};
    use std::io::{Cursor, Read};

    fn pack(pages: &[PageFile], info: Option<&ComicInfo>) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        write(pages, info, 3, &mut buf).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_archive_is_deterministic() {
        let tmp = tempfile::tempdir().unwrap();
        let pages: Vec<PageFile> = (0..4)
            .map(|i| write_page(tmp.path(), i, &png_bytes(3, 3, i as u8), "png"))
            .collect();
        let info = ComicInfo::new(&Work::new("w", "Work", vec![]), &Chapter::new("c", "1", "A"));

        let first = pack(&pages, Some(&info));
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = pack(&pages, Some(&info));

        assert_eq!(first, second);
    }

    #[test]
    fn test_entries_follow_position_order() {
        let tmp = tempfile::tempdir().unwrap();
        let pages = vec![
            write_page(tmp.path(), 0, b"first", "jpg"),
            write_page(tmp.path(), 1, b"second", "png"),
            write_page(tmp.path(), 2, b"third", "jpg"),
        ];
        let info = ComicInfo::new(&Work::new("w", "Work", vec![]), &Chapter::new("c", "1", ""));

        let bytes = pack(&pages, Some(&info));
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["ComicInfo.xml", "001.jpg", "002.png", "003.jpg"]);

        let mut content = String::new();
        archive.by_name("002.png").unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn test_missing_page_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let pages = vec![
            write_page(tmp.path(), 0, b"first", "jpg"),
            PageFile {
                position: 1,
                path: tmp.path().join("gone.jpg"),
            },
        ];

        let mut buf = Cursor::new(Vec::new());
        let skipped = write(&pages, None, 3, &mut buf).unwrap();

        assert_eq!(skipped.len(), 1);
        assert_eq!(skipped[0].position, 1);
        let archive = zip::ZipArchive::new(Cursor::new(buf.into_inner())).unwrap();
        assert_eq!(archive.len(), 1);
    }
}

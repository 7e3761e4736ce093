use std::fs;

use super::{Conversion, ConversionError, Result};
use crate::layout::{self, ChapterDestination};
use crate::model::PageFile;

/// Loose images: pages end up in the chapter directory under their
/// position-ordered name, nothing is decoded.
pub(super) fn collect(
    pages: &[PageFile],
    destination: &ChapterDestination,
    digits: usize,
) -> Result<Conversion> {
    fs::create_dir_all(&destination.dir).map_err(|e| ConversionError::write(&destination.dir, e))?;

    for page in pages {
        if page.path.parent() == Some(destination.dir.as_path()) {
            continue;
        }
        let ext = page
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("webp");
        let target = destination
            .dir
            .join(layout::page_file_name(page.position, digits, ext));
        fs::rename(&page.path, &target).map_err(|e| ConversionError::write(&target, e))?;
    }

    Ok(Conversion {
        artifact: destination.dir.clone(),
        skipped: Vec::new(),
    })
}

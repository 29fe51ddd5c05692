use std::io::{Cursor, Read};

use tracing::{debug, warn};
use zip::ZipArchive;

use crate::domain::RawFile;
use crate::error::IngestError;

/// Upper bound for pre-allocation from an entry's declared size.
const MAX_PREALLOC: u64 = 1024 * 1024;

/// Decompresses a zip archive fully into memory.
///
/// Every entry path loses its first segment (the archive's synthetic root).
/// Entries left with an empty name, directory entries and entries escaping
/// the archive root are dropped. `DICOMDIR` keeps an empty media type, every
/// other file is typed as DICOM. Any decoding failure aborts the whole call.
pub fn extract(bytes: &[u8]) -> Result<Vec<RawFile>, IngestError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|err| IngestError::Extraction(err.to_string()))?;

    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| IngestError::Extraction(err.to_string()))?;

        if entry.is_dir() {
            continue;
        }
        if entry.enclosed_name().is_none() {
            warn!(entry = entry.name(), "skipping zip entry outside archive root");
            continue;
        }
        let Some(file_name) = strip_root(entry.name()) else {
            continue;
        };
        let file_name = file_name.to_string();

        let mut content = Vec::with_capacity(capacity_hint(entry.size()));
        entry
            .read_to_end(&mut content)
            .map_err(|err| IngestError::Extraction(format!("{file_name}: {err}")))?;
        files.push(RawFile::from_entry(file_name, content));
    }

    debug!(entries = archive.len(), files = files.len(), "archive extracted");
    Ok(files)
}

/// Declared sizes come from the archive headers and are not trusted.
fn capacity_hint(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_PREALLOC)).unwrap_or(0)
}

/// Everything after the first `/`, or `None` when that remainder is empty.
pub fn strip_root(path: &str) -> Option<&str> {
    match path.split_once('/') {
        Some((_, rest)) if !rest.is_empty() => Some(rest),
        _ => None,
    }
}

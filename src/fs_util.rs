use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8Path;
use tracing::debug;

use crate::archive;
use crate::domain::RawFile;
use crate::error::IngestError;

/// Reads a local selection of files and directories into raw files.
///
/// Directories are walked recursively, `.zip` files are extracted in memory,
/// everything else becomes one raw file named after its file name.
pub fn read_selection(paths: &[impl AsRef<Utf8Path>]) -> Result<Vec<RawFile>, IngestError> {
    let mut files = Vec::new();
    for path in paths {
        let path = path.as_ref();
        let std_path = path.as_std_path();
        if std_path.is_dir() {
            let mut entries = walk_dir(std_path)?;
            entries.sort();
            for entry in entries.into_iter().filter(|entry| entry.is_file()) {
                read_file(&entry, &mut files)?;
            }
        } else {
            read_file(std_path, &mut files)?;
        }
    }
    debug!(inputs = paths.len(), files = files.len(), "local selection read");
    Ok(files)
}

fn read_file(path: &Path, files: &mut Vec<RawFile>) -> Result<(), IngestError> {
    let bytes = fs::read(path)
        .map_err(|err| IngestError::Filesystem(format!("read {}: {err}", path.display())))?;
    if path.extension().is_some_and(|ext| ext == "zip") {
        files.extend(archive::extract(&bytes)?);
        return Ok(());
    }
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| IngestError::Filesystem(format!("no file name: {}", path.display())))?;
    files.push(RawFile::from_entry(name, bytes));
    Ok(())
}

fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| IngestError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| IngestError::Filesystem(err.to_string()))?;
            let path = entry.path();
            // Symlinked directories are not followed.
            let file_type = entry
                .file_type()
                .map_err(|err| IngestError::Filesystem(format!("{}: {err}", path.display())))?;
            if file_type.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    Ok(items)
}

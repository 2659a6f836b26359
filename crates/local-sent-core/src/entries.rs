//! Expansion of a file or directory into ordered transfer entries.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

/// One file scheduled for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferEntry {
    /// Path of the source file on this machine.
    pub source_path: PathBuf,
    /// POSIX-style path the file will take at the receiver.
    pub relative_path: String,
    /// Size in bytes at scan time.
    pub size: u64,
}

/// Expand `path` into transfer entries.
///
/// A regular file becomes a single entry named by its file name. A directory
/// is walked recursively; each contained regular file becomes an entry whose
/// relative path is rooted at the directory name. Entries are sorted by
/// relative path. Empty directories and non-regular sources are rejected.
pub async fn build_transfer_entries(path: &Path) -> Result<Vec<TransferEntry>> {
    let meta = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::path(format!("cannot read {}: {e}", path.display())))?;

    if meta.is_file() {
        let name = path
            .file_name()
            .ok_or_else(|| Error::path(format!("{} has no file name", path.display())))?
            .to_string_lossy()
            .into_owned();
        return Ok(vec![TransferEntry {
            source_path: path.to_path_buf(),
            relative_path: name,
            size: meta.len(),
        }]);
    }

    if !meta.is_dir() {
        return Err(Error::path(format!(
            "{} is not a regular file or directory",
            path.display()
        )));
    }

    let root_name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());

    let mut entries = Vec::new();
    let mut stack: Vec<(PathBuf, String)> = vec![(path.to_path_buf(), root_name)];

    while let Some((dir, prefix)) = stack.pop() {
        let mut dir_entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::path(format!("cannot read {}: {e}", dir.display())))?;

        while let Some(entry) = dir_entries
            .next_entry()
            .await
            .map_err(|e| Error::path(format!("cannot read entry in {}: {e}", dir.display())))?
        {
            let entry_path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let relative = format!("{prefix}/{name}");
            let entry_meta = tokio::fs::metadata(&entry_path)
                .await
                .map_err(|e| Error::path(format!("cannot stat {}: {e}", entry_path.display())))?;

            if entry_meta.is_dir() {
                stack.push((entry_path, relative));
            } else if entry_meta.is_file() {
                entries.push(TransferEntry {
                    source_path: entry_path,
                    relative_path: relative,
                    size: entry_meta.len(),
                });
            } else {
                debug!(path = %entry_path.display(), "skipping non-regular entry");
            }
        }
    }

    if entries.is_empty() {
        return Err(Error::path(format!(
            "{} contains no files",
            path.display()
        )));
    }

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

//! Flat enumeration of the exported messages in one backup directory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{ExportError, Result};
use crate::model::record::{content_path, SIDECAR_EXTENSION};

/// One exported message found on disk.
///
/// Only the sidecar is guaranteed to exist; `content_path` is where the
/// assembled message would be, and callers check for it themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub id: String,
    pub sidecar_path: PathBuf,
    pub content_path: PathBuf,
}

/// Visit every sidecar directly inside `root`, in file-name order.
///
/// Subdirectories (partial-output dirs and snapshots) are not descended
/// into. Entries that cannot be inspected are logged and skipped. Only a
/// failure to list `root` itself, or cancellation, is an error.
pub fn walk_backup_dir(
    root: &Path,
    cancel: &CancelToken,
    visit: &mut dyn FnMut(&BackupEntry),
) -> Result<()> {
    let read_dir = std::fs::read_dir(root).map_err(|e| ExportError::io(root, e))?;

    let mut children = Vec::new();
    for entry in read_dir {
        match entry {
            Ok(entry) => children.push(entry),
            Err(e) => warn!(path = %root.display(), error = %e, "Cannot read directory entry. Skipping."),
        }
    }
    children.sort_by_key(|entry| entry.file_name());

    let mut visited = 0usize;
    for child in children {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let path = child.path();
        let file_type = match child.file_type() {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot inspect entry. Skipping.");
                continue;
            }
        };
        if file_type.is_dir() {
            continue;
        }

        let file_name = child.file_name();
        let Some(name) = file_name.to_str() else {
            debug!(path = %path.display(), "Skipping non-UTF-8 file name");
            continue;
        };
        let Some(id) = name.strip_suffix(SIDECAR_EXTENSION) else {
            continue;
        };
        if id.is_empty() {
            continue;
        }

        visit(&BackupEntry {
            id: id.to_string(),
            content_path: content_path(root, id),
            sidecar_path: path,
        });
        visited += 1;
    }

    debug!(root = %root.display(), count = visited, "Walked backup directory");
    Ok(())
}

//! Timestamped snapshot directories under a backup root.
//!
//! A snapshot is a directory named `mail_YYYYMMDD_HHMMSS` holding the output
//! of one export run. Anything else under the root is ignored.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::cancel::CancelToken;
use crate::error::{ExportError, Result};

/// Name prefix of snapshot directories.
pub const SNAPSHOT_PREFIX: &str = "mail_";

const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

fn snapshot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^mail_\d{8}_\d{6}$").expect("valid snapshot pattern"))
}

/// Whether a directory name is a snapshot name.
pub fn is_snapshot_name(name: &str) -> bool {
    snapshot_pattern().is_match(name)
}

/// Directory name for a snapshot taken at `at`.
pub fn snapshot_dir_name(at: DateTime<Utc>) -> String {
    format!("{SNAPSHOT_PREFIX}{}", at.format(SNAPSHOT_TIME_FORMAT))
}

/// Time encoded in a snapshot directory name.
pub fn snapshot_time(path: &Path) -> Option<NaiveDateTime> {
    let name = path.file_name()?.to_str()?;
    if !is_snapshot_name(name) {
        return None;
    }
    NaiveDateTime::parse_from_str(&name[SNAPSHOT_PREFIX.len()..], SNAPSHOT_TIME_FORMAT).ok()
}

/// List the snapshot directories directly under `root`, oldest first.
///
/// Entries that cannot be inspected are skipped silently. Only a failure to
/// list `root` itself, or cancellation, is an error.
pub fn list_snapshots(root: &Path, cancel: &CancelToken) -> Result<Vec<PathBuf>> {
    let read_dir = std::fs::read_dir(root).map_err(|e| ExportError::io(root, e))?;

    let mut snapshots = Vec::new();
    for entry in read_dir {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        let Ok(entry) = entry else { continue };
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if !file_type.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if name.to_str().is_some_and(is_snapshot_name) {
            snapshots.push(entry.path());
        }
    }

    // Fixed-width timestamps sort chronologically as strings
    snapshots.sort();
    Ok(snapshots)
}

/// The most recent snapshot under `root`, if any.
pub fn latest_snapshot(root: &Path, cancel: &CancelToken) -> Result<Option<PathBuf>> {
    Ok(list_snapshots(root, cancel)?.pop())
}

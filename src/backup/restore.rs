//! Restore planning over a backup root and its snapshots.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::model::record::{partial_dir, ExportRecord};

use super::snapshots::list_snapshots;
use super::walk::{walk_backup_dir, BackupEntry};

/// What is actually on disk for a restorable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    /// `<id>.eml` is present.
    Complete,
    /// Only salvaged parts in `<id>/` are present.
    Partial,
    /// The sidecar exists but no content was found.
    Missing,
}

/// One message selected for restore.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreItem {
    pub record: ExportRecord,
    /// Directory the sidecar was found in.
    pub source_dir: PathBuf,
    /// Content file or partial directory, if any.
    pub location: Option<PathBuf>,
    pub state: RestoreState,
}

/// The set of messages a restore would bring back, one per id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestorePlan {
    pub items: Vec<RestoreItem>,
    /// Sidecars that could not be parsed.
    pub unreadable: Vec<PathBuf>,
}

impl RestorePlan {
    /// Plan a restore from `root` and its snapshots.
    ///
    /// The root is read first, then snapshots oldest to newest. The first
    /// readable sidecar for an id wins.
    pub fn build(root: &Path, cancel: &CancelToken) -> Result<Self> {
        let mut dirs = vec![root.to_path_buf()];
        dirs.extend(list_snapshots(root, cancel)?);

        let mut plan = Self::default();
        let mut seen: HashSet<String> = HashSet::new();

        for dir in &dirs {
            walk_backup_dir(dir, cancel, &mut |entry| {
                if seen.contains(&entry.id) {
                    return;
                }
                match ExportRecord::read(&entry.sidecar_path) {
                    Ok(record) => {
                        seen.insert(entry.id.clone());
                        plan.items.push(classify(dir, entry, record));
                    }
                    Err(e) => {
                        warn!(path = %entry.sidecar_path.display(), error = %e, "Unreadable sidecar. Skipping.");
                        plan.unreadable.push(entry.sidecar_path.clone());
                    }
                }
            })?;
        }

        info!(
            root = %root.display(),
            directories = dirs.len(),
            messages = plan.items.len(),
            "Built restore plan"
        );
        Ok(plan)
    }

    pub fn count(&self, state: RestoreState) -> usize {
        self.items.iter().filter(|i| i.state == state).count()
    }

    /// Items with any content to restore.
    pub fn restorable(&self) -> impl Iterator<Item = &RestoreItem> {
        self.items.iter().filter(|i| i.state != RestoreState::Missing)
    }
}

fn classify(dir: &Path, entry: &BackupEntry, record: ExportRecord) -> RestoreItem {
    let partial = partial_dir(dir, &entry.id);
    let (state, location) = if entry.content_path.is_file() {
        (RestoreState::Complete, Some(entry.content_path.clone()))
    } else if partial.is_dir() {
        (RestoreState::Partial, Some(partial))
    } else {
        (RestoreState::Missing, None)
    };
    RestoreItem {
        record,
        source_dir: dir.to_path_buf(),
        location,
        state,
    }
}

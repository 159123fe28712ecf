//! Already-exported lookup used to make exports resumable.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::Result;

use super::snapshots::list_snapshots;
use super::walk::walk_backup_dir;

/// Answers whether a message id is already exported.
pub trait DedupOracle: Send + Sync {
    fn has_message(&self, id: &str) -> Result<bool>;
}

/// Oracle for fresh exports: nothing is ever present.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysMissing;

impl DedupOracle for AlwaysMissing {
    fn has_message(&self, _id: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Set of message ids with a sidecar in a backup.
#[derive(Debug, Clone, Default)]
pub struct BackupIndex {
    ids: HashSet<String>,
}

impl BackupIndex {
    /// Index the sidecars directly inside `dir`.
    ///
    /// A directory that does not exist yet yields an empty index.
    pub fn build(dir: &Path, cancel: &CancelToken) -> Result<Self> {
        let mut index = Self::default();
        if dir.is_dir() {
            index.add_dir(dir, cancel)?;
        }
        info!(dir = %dir.display(), count = index.len(), "Indexed existing export");
        Ok(index)
    }

    /// Index `root` plus every snapshot directory beneath it.
    pub fn build_tree(root: &Path, cancel: &CancelToken) -> Result<Self> {
        let mut index = Self::default();
        if root.is_dir() {
            index.add_dir(root, cancel)?;
            for snapshot in list_snapshots(root, cancel)? {
                index.add_dir(&snapshot, cancel)?;
            }
        }
        info!(root = %root.display(), count = index.len(), "Indexed backup tree");
        Ok(index)
    }

    fn add_dir(&mut self, dir: &Path, cancel: &CancelToken) -> Result<()> {
        let before = self.ids.len();
        walk_backup_dir(dir, cancel, &mut |entry| {
            self.ids.insert(entry.id.clone());
        })?;
        debug!(dir = %dir.display(), added = self.ids.len() - before, "Indexed directory");
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for BackupIndex {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

impl DedupOracle for BackupIndex {
    fn has_message(&self, id: &str) -> Result<bool> {
        Ok(self.contains(id))
    }
}

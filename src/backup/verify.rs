//! Integrity check of one backup directory.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::model::record::{content_checksum, partial_dir, ExportRecord, WriterOutcome};

use super::walk::walk_backup_dir;

/// Result of [`verify_backup`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Sidecars examined.
    pub checked: usize,
    /// Complete messages whose content matched (or had no recorded checksum).
    pub ok: usize,
    /// Messages exported only partially (salvaged parts or missing key).
    pub partial: usize,
    /// Messages with an outcome that carries no local content.
    pub external: usize,
    /// Ids whose content hash differs from the sidecar.
    pub mismatched: Vec<String>,
    /// Ids whose expected content file or partial directory is absent.
    pub missing_content: Vec<String>,
    /// Sidecars that could not be parsed.
    pub unreadable: Vec<PathBuf>,
}

impl VerifyReport {
    /// `true` if nothing is damaged or missing.
    pub fn is_clean(&self) -> bool {
        self.mismatched.is_empty() && self.missing_content.is_empty() && self.unreadable.is_empty()
    }
}

/// Check every sidecar directly in `dir` against the content next to it.
pub fn verify_backup(dir: &Path, cancel: &CancelToken) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();

    walk_backup_dir(dir, cancel, &mut |entry| {
        report.checked += 1;
        let record = match ExportRecord::read(&entry.sidecar_path) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %entry.sidecar_path.display(), error = %e, "Unreadable sidecar");
                report.unreadable.push(entry.sidecar_path.clone());
                return;
            }
        };

        match record.outcome {
            WriterOutcome::AssembledComplete => match std::fs::read(&entry.content_path) {
                Ok(bytes) => match &record.checksum {
                    Some(expected) if *expected != content_checksum(&bytes) => {
                        warn!(id = %entry.id, "Content checksum mismatch");
                        report.mismatched.push(entry.id.clone());
                    }
                    _ => report.ok += 1,
                },
                Err(e) => {
                    warn!(path = %entry.content_path.display(), error = %e, "Missing content file");
                    report.missing_content.push(entry.id.clone());
                }
            },
            WriterOutcome::FailedToAssemble | WriterOutcome::MissingDecryptionKey => {
                if partial_dir(dir, &entry.id).is_dir() {
                    report.partial += 1;
                } else {
                    report.missing_content.push(entry.id.clone());
                }
            }
            WriterOutcome::RenderedPdf => report.external += 1,
        }
    })?;

    info!(
        dir = %dir.display(),
        checked = report.checked,
        ok = report.ok,
        mismatched = report.mismatched.len(),
        missing = report.missing_content.len(),
        "Verified backup"
    );
    Ok(report)
}

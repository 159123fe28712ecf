//! Export sidecar records.
//!
//! Every attempted message leaves a `<id>.metadata.json` file next to its
//! content. The sidecar is written last, so its presence alone means the
//! message is exported, whatever the [`WriterOutcome`].

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ExportError, Result};

use super::message::MessageMetadata;

/// Suffix of sidecar record files.
pub const SIDECAR_EXTENSION: &str = ".metadata.json";

/// Suffix of fully assembled message files.
pub const CONTENT_EXTENSION: &str = ".eml";

/// How (or how incompletely) a message was persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterOutcome {
    /// Content fully decrypted and written as `<id>.eml`.
    AssembledComplete,
    /// Parts were salvaged into `<id>/` but the final message could not be built.
    FailedToAssemble,
    /// No key could decrypt the message; the raw body sits in `<id>/`.
    MissingDecryptionKey,
    /// Rendered to PDF by an external renderer.
    RenderedPdf,
}

impl WriterOutcome {
    /// Whether a complete content file is expected next to the sidecar.
    pub fn has_content_file(self) -> bool {
        matches!(self, Self::AssembledComplete)
    }

    /// Whether salvaged artifacts live in a `<id>/` directory.
    pub fn has_partial_dir(self) -> bool {
        matches!(self, Self::FailedToAssemble | Self::MissingDecryptionKey)
    }
}

impl std::fmt::Display for WriterOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::AssembledComplete => "assembled",
            Self::FailedToAssemble => "failed to assemble",
            Self::MissingDecryptionKey => "missing decryption key",
            Self::RenderedPdf => "rendered as PDF",
        };
        f.write_str(label)
    }
}

/// The persisted sidecar for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRecord {
    #[serde(flatten)]
    pub message: MessageMetadata,

    pub outcome: WriterOutcome,

    /// Hex SHA-256 of the content file, for complete messages only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    pub exported_at: DateTime<Utc>,
}

impl ExportRecord {
    /// Create a record stamped with the current time.
    pub fn new(message: MessageMetadata, outcome: WriterOutcome, checksum: Option<String>) -> Self {
        Self {
            message,
            outcome,
            checksum,
            exported_at: Utc::now(),
        }
    }

    /// Serialize as pretty-printed JSON.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| ExportError::InvalidRecord {
            path: PathBuf::from(format!("{}{SIDECAR_EXTENSION}", self.message.id)),
            reason: e.to_string(),
        })
    }

    /// Read and parse a sidecar file.
    pub fn read(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| ExportError::io(path, e))?;
        serde_json::from_slice(&data).map_err(|e| ExportError::InvalidRecord {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Write the sidecar into `dir` through a temp file, returning the
    /// number of bytes written.
    pub fn write(&self, dir: &Path) -> Result<u64> {
        let data = self.to_bytes()?;
        write_atomic(&sidecar_path(dir, &self.message.id), &data)?;
        Ok(data.len() as u64)
    }
}

/// Check that a message id can name files inside a backup directory.
///
/// Ids become `<id>.eml`, `<id>.metadata.json` and `<id>/`, so they must be
/// a single, non-special path component.
pub fn validate_message_id(id: &str) -> Result<()> {
    let reason = if id.is_empty() {
        "empty id"
    } else if id == "." || id == ".." {
        "id is a relative path component"
    } else if id.contains(['/', '\\']) {
        "id contains a path separator"
    } else if id.contains('\0') {
        "id contains a NUL byte"
    } else {
        return Ok(());
    };
    Err(ExportError::InvalidMessageId {
        id: id.to_string(),
        reason: reason.to_string(),
    })
}

/// Write through a sibling temp file so readers never see a torn file.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data).map_err(|e| ExportError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| ExportError::io(path, e))
}

/// Hex SHA-256 of a content file's bytes, as stored in [`ExportRecord::checksum`].
pub fn content_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// `<dir>/<id>.metadata.json`
pub fn sidecar_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}{SIDECAR_EXTENSION}"))
}

/// `<dir>/<id>.eml`
pub fn content_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}{CONTENT_EXTENSION}"))
}

/// `<dir>/<id>/`, where partial artifacts are salvaged.
pub fn partial_dir(dir: &Path, id: &str) -> PathBuf {
    dir.join(id)
}

//! Write stage: persist each message and its sidecar.
//!
//! Disk I/O runs on the blocking pool. Per message the content goes first
//! (complete `.eml` via temp file and rename, or salvaged parts under
//! `<id>/`) and the sidecar last, so a sidecar always means "done".

use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ExportError, Result};
use crate::model::message::FullMessage;
use crate::model::record::{
    content_checksum, content_path, partial_dir, validate_message_id, write_atomic, ExportRecord,
    WriterOutcome,
};

use super::decrypt::{DecryptedMessage, WriteJob};
use super::eml::{assemble_eml, sanitize_filename_part};
use super::stage::{pop, StageContext};

const MAX_NAME_LEN: usize = 80;

/// What one write produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrittenMessage {
    pub outcome: WriterOutcome,
    /// Bytes written, sidecar included.
    pub bytes: u64,
}

/// Persist one job into `dir`.
///
/// Ids that cannot name a file inside `dir` are rejected before anything is
/// written.
pub fn write_message(dir: &Path, job: WriteJob) -> Result<WrittenMessage> {
    validate_message_id(job.id())?;
    let (record, mut bytes) = match job {
        WriteJob::Decrypted(msg) if msg.is_complete() => write_complete(dir, msg)?,
        WriteJob::Decrypted(msg) => salvage_decrypted(dir, msg)?,
        WriteJob::Corrupt { message, reason } => {
            debug!(id = %message.metadata.id, reason = %reason, "Salvaging unreadable message");
            salvage_raw(dir, message, true, WriterOutcome::FailedToAssemble)?
        }
        WriteJob::MissingKey(message) => {
            salvage_raw(dir, message, false, WriterOutcome::MissingDecryptionKey)?
        }
    };

    bytes += record.write(dir)?;

    Ok(WrittenMessage {
        outcome: record.outcome,
        bytes,
    })
}

fn write_complete(dir: &Path, msg: DecryptedMessage) -> Result<(ExportRecord, u64)> {
    let eml = match assemble_eml(&msg) {
        Ok(eml) => eml,
        Err(e) => {
            warn!(id = %msg.metadata.id, error = %e, "Keeping parts of unassemblable message");
            return salvage_decrypted(dir, msg);
        }
    };
    write_atomic(&content_path(dir, &msg.metadata.id), &eml)?;
    let record = ExportRecord::new(
        msg.metadata,
        WriterOutcome::AssembledComplete,
        Some(content_checksum(&eml)),
    );
    Ok((record, eml.len() as u64))
}

/// The message cannot be built, usually because attachment shards are
/// missing: keep the body and whatever decrypted.
fn salvage_decrypted(dir: &Path, msg: DecryptedMessage) -> Result<(ExportRecord, u64)> {
    let parts = create_partial_dir(dir, &msg.metadata.id)?;
    let mut bytes = write_part(&parts.join("body.txt"), &msg.body)?;

    for (n, att) in msg.attachments.iter().enumerate() {
        match &att.data {
            Some(data) => bytes += write_part(&parts.join(attachment_file(n, &att.name, "")), data)?,
            None => warn!(id = %msg.metadata.id, attachment = %att.name, "Attachment could not be decrypted"),
        }
    }

    let record = ExportRecord::new(msg.metadata, WriterOutcome::FailedToAssemble, None);
    Ok((record, bytes))
}

/// Keep the stored bytes as they are. Attachments are kept only when
/// `with_attachments` is set.
fn salvage_raw(
    dir: &Path,
    message: FullMessage,
    with_attachments: bool,
    outcome: WriterOutcome,
) -> Result<(ExportRecord, u64)> {
    let parts = create_partial_dir(dir, &message.metadata.id)?;
    let mut bytes = write_part(&parts.join("body.pgp"), &message.body)?;

    if with_attachments {
        for (n, att) in message.attachments.iter().enumerate() {
            bytes += write_part(&parts.join(attachment_file(n, &att.name, ".pgp")), &att.data)?;
        }
    }

    let record = ExportRecord::new(message.metadata, outcome, None);
    Ok((record, bytes))
}

/// `attachment_<n>_<name><suffix>`, numbered from 1 in message order.
fn attachment_file(index: usize, name: &str, suffix: &str) -> String {
    format!(
        "attachment_{}_{}{suffix}",
        index + 1,
        sanitize_filename_part(name, MAX_NAME_LEN)
    )
}

fn create_partial_dir(dir: &Path, id: &str) -> Result<PathBuf> {
    let parts = partial_dir(dir, id);
    fs::create_dir_all(&parts).map_err(|e| ExportError::io(&parts, e))?;
    Ok(parts)
}

fn write_part(path: &Path, data: &[u8]) -> Result<u64> {
    fs::write(path, data).map_err(|e| ExportError::io(path, e))?;
    Ok(data.len() as u64)
}

/// Final stage of the pipeline.
pub struct WriteStage {
    dir: PathBuf,
    input: mpsc::Receiver<WriteJob>,
}

impl WriteStage {
    pub fn new(dir: PathBuf, input: mpsc::Receiver<WriteJob>) -> Self {
        Self { dir, input }
    }

    /// Write until the queue closes. Returns the number of bytes written.
    /// A rejected message is reported and skipped; a disk error is reported
    /// and ends the stage.
    pub async fn run(mut self, ctx: StageContext) -> u64 {
        let mut total = 0u64;
        while let Some(job) = pop(&mut self.input, &ctx.cancel).await {
            let id = job.id().to_string();
            let dir = self.dir.clone();
            let joined = tokio::task::spawn_blocking(move || write_message(&dir, job)).await;
            match joined {
                Ok(Ok(written)) => {
                    debug!(id = %id, outcome = %written.outcome, bytes = written.bytes, "Message written");
                    total += written.bytes;
                    ctx.progress.on_exported(written.outcome);
                }
                Ok(Err(e)) => {
                    let fatal = e.is_fatal();
                    ctx.errors.report_stage_error(e);
                    if fatal {
                        break;
                    }
                }
                Err(e) => {
                    ctx.errors
                        .report_stage_error(ExportError::Task(format!("writing '{id}': {e}")));
                    break;
                }
            }
        }
        total
    }
}

//! Pipeline orchestrator: wires the stages together and owns the error policy.
//!
//! ```text
//! MessageStore ─▶ MetadataStage ─▶ FetchStage ─▶ DecryptStage ─▶ WriteStage ─▶ disk
//!                   (dedup, filter)      bounded queues between every pair
//! ```
//!
//! The first fatal error reported by any stage wins: it is kept, the shared
//! [`CancelToken`] fires, and every stage drops its queue sender on the way
//! out so downstream stages drain and exit.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::backup::{BackupIndex, DedupOracle};
use crate::cancel::CancelToken;
use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::filter::FilterSpec;
use crate::model::record::WriterOutcome;
use crate::source::{MessageStore, Paginator};

use super::decrypt::{DecryptStage, Decryptor};
use super::fetch::FetchStage;
use super::metadata::MetadataStage;
use super::stage::{ErrorReporter, ProgressReporter, StageContext};
use super::writer::WriteStage;

/// Pipeline sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    pub page_size: usize,
    pub batch_size: usize,
    pub queue_capacity: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from(&ExportConfig::default())
    }
}

impl From<&ExportConfig> for ExportOptions {
    fn from(cfg: &ExportConfig) -> Self {
        Self {
            page_size: cfg.page_size,
            batch_size: cfg.batch_size,
            queue_capacity: cfg.queue_capacity,
        }
    }
}

/// Counts for one finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// Dropped because already exported or filtered out.
    pub skipped: usize,
    pub complete: usize,
    pub failed_to_assemble: usize,
    pub missing_key: usize,
    /// Non-fatal errors (dedup checks, rejected ids) that were logged and skipped.
    pub check_errors: usize,
    pub bytes_written: u64,
}

impl ExportSummary {
    /// Messages written this run, whatever their outcome.
    pub fn exported(&self) -> usize {
        self.complete + self.failed_to_assemble + self.missing_key
    }
}

/// Runs exports against one store and decryptor.
pub struct Exporter {
    store: Arc<dyn MessageStore>,
    decryptor: Arc<dyn Decryptor>,
    options: ExportOptions,
}

impl Exporter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        decryptor: Arc<dyn Decryptor>,
        options: ExportOptions,
    ) -> Self {
        Self {
            store,
            decryptor,
            options,
        }
    }

    /// Export everything matching `filter` into `output_dir`, skipping
    /// messages that already have a sidecar there.
    pub async fn run(
        &self,
        filter: &FilterSpec,
        output_dir: &Path,
        progress: Arc<dyn ProgressReporter>,
        cancel: CancelToken,
    ) -> Result<ExportSummary> {
        filter.validate()?;
        let index = {
            let dir = output_dir.to_path_buf();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || BackupIndex::build(&dir, &cancel))
                .await
                .map_err(|e| ExportError::Task(e.to_string()))??
        };
        self.run_with_oracle(filter, output_dir, Arc::new(index), progress, cancel)
            .await
    }

    /// Like [`Exporter::run`], with a caller-supplied dedup oracle.
    pub async fn run_with_oracle(
        &self,
        filter: &FilterSpec,
        output_dir: &Path,
        oracle: Arc<dyn DedupOracle>,
        progress: Arc<dyn ProgressReporter>,
        cancel: CancelToken,
    ) -> Result<ExportSummary> {
        filter.validate()?;
        std::fs::create_dir_all(output_dir).map_err(|e| ExportError::io(output_dir, e))?;

        let (server, client_side) = filter.to_server_filter();
        info!(
            output = %output_dir.display(),
            client_side,
            page_size = self.options.page_size,
            "Starting export"
        );

        let errors = Arc::new(FirstError::new(cancel.clone()));
        let counter = Arc::new(CountingProgress::new(progress));
        let ctx = StageContext {
            cancel: cancel.clone(),
            errors: errors.clone(),
            progress: counter.clone(),
        };

        let capacity = self.options.queue_capacity;
        let paginator = Paginator::new(self.store.clone(), server, self.options.page_size);
        let (metadata, batches) = MetadataStage::new(
            paginator,
            filter.clone(),
            oracle,
            self.options.batch_size,
            capacity,
        );
        let (fetch, fetched) = FetchStage::new(self.store.clone(), batches, capacity);
        let (decrypt, decrypted) = DecryptStage::new(self.decryptor.clone(), fetched, capacity);
        let write = WriteStage::new(output_dir.to_path_buf(), decrypted);

        let mut tasks = JoinSet::new();
        {
            let ctx = ctx.clone();
            tasks.spawn(async move {
                metadata.run(ctx).await;
                0
            });
        }
        {
            let ctx = ctx.clone();
            tasks.spawn(async move {
                fetch.run(ctx).await;
                0
            });
        }
        {
            let ctx = ctx.clone();
            tasks.spawn(async move {
                decrypt.run(ctx).await;
                0
            });
        }
        tasks.spawn(write.run(ctx));

        let mut bytes_written = 0u64;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(bytes) => bytes_written += bytes,
                Err(e) => errors.report_stage_error(ExportError::Task(e.to_string())),
            }
        }

        if let Some(err) = errors.take() {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let summary = counter.summary(bytes_written, errors.non_fatal());
        info!(
            exported = summary.exported(),
            skipped = summary.skipped,
            failed = summary.failed_to_assemble,
            missing_key = summary.missing_key,
            "Export finished"
        );
        Ok(summary)
    }
}

// ── Error policy ────────────────────────────────────────────────

/// Keeps the first fatal error and cancels the run when it arrives.
struct FirstError {
    cancel: CancelToken,
    first: Mutex<Option<ExportError>>,
    non_fatal: AtomicUsize,
}

impl FirstError {
    fn new(cancel: CancelToken) -> Self {
        Self {
            cancel,
            first: Mutex::new(None),
            non_fatal: AtomicUsize::new(0),
        }
    }

    fn take(&self) -> Option<ExportError> {
        match self.first.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn non_fatal(&self) -> usize {
        self.non_fatal.load(Ordering::Relaxed)
    }
}

impl ErrorReporter for FirstError {
    fn report_stage_error(&self, err: ExportError) {
        if !err.is_fatal() {
            warn!(error = %err, "Stage error, continuing");
            self.non_fatal.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut slot = match self.first.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if slot.is_none() {
            error!(error = %err, "Export failed, cancelling pipeline");
            *slot = Some(err);
            drop(slot);
            self.cancel.cancel();
        } else {
            warn!(error = %err, "Discarding error raised during shutdown");
        }
    }
}

// ── Progress accounting ─────────────────────────────────────────

/// Forwards progress to the caller while tallying the summary.
struct CountingProgress {
    inner: Arc<dyn ProgressReporter>,
    skipped: AtomicUsize,
    complete: AtomicUsize,
    failed: AtomicUsize,
    missing_key: AtomicUsize,
}

impl CountingProgress {
    fn new(inner: Arc<dyn ProgressReporter>) -> Self {
        Self {
            inner,
            skipped: AtomicUsize::new(0),
            complete: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            missing_key: AtomicUsize::new(0),
        }
    }

    fn summary(&self, bytes_written: u64, check_errors: usize) -> ExportSummary {
        ExportSummary {
            skipped: self.skipped.load(Ordering::Relaxed),
            complete: self.complete.load(Ordering::Relaxed),
            failed_to_assemble: self.failed.load(Ordering::Relaxed),
            missing_key: self.missing_key.load(Ordering::Relaxed),
            check_errors,
            bytes_written,
        }
    }
}

impl ProgressReporter for CountingProgress {
    fn on_progress(&self, count: usize) {
        self.skipped.fetch_add(count, Ordering::Relaxed);
        self.inner.on_progress(count);
    }

    fn on_exported(&self, outcome: WriterOutcome) {
        let counter = match outcome {
            WriterOutcome::AssembledComplete => &self.complete,
            WriterOutcome::FailedToAssemble => &self.failed,
            WriterOutcome::MissingDecryptionKey => &self.missing_key,
            WriterOutcome::RenderedPdf => &self.complete,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.inner.on_exported(outcome);
    }
}

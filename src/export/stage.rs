//! Shared plumbing for pipeline stages: collaborator traits, the per-run
//! context handed to every stage, and cancellable queue operations.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::cancel::CancelToken;
use crate::error::ExportError;
use crate::model::record::WriterOutcome;

/// Sink for errors raised inside a stage. Fire-and-forget.
pub trait ErrorReporter: Send + Sync {
    fn report_stage_error(&self, err: ExportError);
}

/// Sink for progress events. Fire-and-forget.
pub trait ProgressReporter: Send + Sync {
    /// `count` messages of one page were dropped by dedup or filtering.
    fn on_progress(&self, count: usize);

    /// One message reached disk.
    fn on_exported(&self, _outcome: WriterOutcome) {}
}

/// Progress reporter that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn on_progress(&self, _count: usize) {}
}

/// Collaborators shared by all stages of one run.
#[derive(Clone)]
pub struct StageContext {
    pub cancel: CancelToken,
    pub errors: Arc<dyn ErrorReporter>,
    pub progress: Arc<dyn ProgressReporter>,
}

/// Push `item`, waiting for room. Returns `false` if the run was cancelled
/// or the consumer is gone; the caller should stop producing.
pub async fn push<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancelToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Pop the next item. Returns `None` when the producer closed the queue or
/// the run was cancelled.
pub async fn pop<T>(rx: &mut mpsc::Receiver<T>, cancel: &CancelToken) -> Option<T> {
    if cancel.is_cancelled() {
        return None;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        item = rx.recv() => item,
    }
}

/// Split `items` into owned chunks of at most `size` elements, keeping order.
pub fn into_chunks<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut current = Vec::with_capacity(size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

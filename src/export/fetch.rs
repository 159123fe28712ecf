//! Fetch stage: turn metadata batches into full stored messages.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::model::message::{FullMessage, MessageMetadata};
use crate::source::MessageStore;

use super::stage::{pop, push, StageContext};

pub struct FetchStage {
    store: Arc<dyn MessageStore>,
    input: mpsc::Receiver<Vec<MessageMetadata>>,
    output: mpsc::Sender<FullMessage>,
}

impl FetchStage {
    pub fn new(
        store: Arc<dyn MessageStore>,
        input: mpsc::Receiver<Vec<MessageMetadata>>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<FullMessage>) {
        let (output, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                store,
                input,
                output,
            },
            rx,
        )
    }

    /// Fetch every queued message. A store error is reported and ends the stage.
    pub async fn run(mut self, ctx: StageContext) {
        let mut fetched = 0usize;
        while let Some(batch) = pop(&mut self.input, &ctx.cancel).await {
            for meta in batch {
                let result = tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return,
                    result = self.store.fetch_message(&meta.id) => result,
                };
                match result {
                    Ok(message) => {
                        if !push(&self.output, message, &ctx.cancel).await {
                            return;
                        }
                        fetched += 1;
                    }
                    Err(e) => {
                        ctx.errors.report_stage_error(e);
                        return;
                    }
                }
            }
        }
        debug!(fetched, "Fetch stage finished");
    }
}

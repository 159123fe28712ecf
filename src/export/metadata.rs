//! First pipeline stage: page through the store, drop what is already
//! exported or filtered out, and emit the rest in batches.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::backup::DedupOracle;
use crate::filter::FilterSpec;
use crate::model::message::MessageMetadata;
use crate::source::Paginator;

use super::stage::{into_chunks, push, StageContext};

/// Produces batches of message metadata that still need exporting.
pub struct MetadataStage {
    paginator: Paginator,
    filter: FilterSpec,
    client_side: bool,
    server_narrowing: bool,
    oracle: Arc<dyn DedupOracle>,
    batch_size: usize,
    output: mpsc::Sender<Vec<MessageMetadata>>,
}

impl MetadataStage {
    /// Create the stage and the receiving end of its output queue.
    ///
    /// The paginator must already carry the server projection of `filter`.
    pub fn new(
        paginator: Paginator,
        filter: FilterSpec,
        oracle: Arc<dyn DedupOracle>,
        batch_size: usize,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Vec<MessageMetadata>>) {
        let (server, client_side) = filter.to_server_filter();
        let (output, rx) = mpsc::channel(capacity.max(1));
        let stage = Self {
            paginator,
            filter,
            client_side,
            server_narrowing: server.is_narrowing(),
            oracle,
            batch_size: batch_size.max(1),
            output,
        };
        (stage, rx)
    }

    /// Run until the listing ends, an error is reported, or the run is
    /// cancelled. The output queue closes when this returns.
    pub async fn run(mut self, ctx: StageContext) {
        if self.server_narrowing {
            info!("Using server-side filtering");
        }
        if self.client_side {
            info!("Using client-side filtering");
        }

        let mut emitted = 0usize;
        loop {
            // 1. Cancellation
            if ctx.cancel.is_cancelled() {
                debug!("Metadata stage cancelled");
                return;
            }

            // 2. Next page, abandoned if cancelled mid-request
            let page = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return,
                page = self.paginator.next_page() => page,
            };
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    ctx.errors.report_stage_error(e);
                    return;
                }
            };

            // 3. End of listing
            if page.is_empty() {
                debug!(emitted, "Metadata stage finished");
                return;
            }

            // 4-5. Dedup, then the client-side pass
            let initial = page.len();
            let mut survivors = Vec::with_capacity(initial);
            for msg in page {
                if ctx.cancel.is_cancelled() {
                    return;
                }
                match self.oracle.has_message(&msg.id) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        ctx.errors.report_stage_error(e);
                        continue;
                    }
                }
                if self.client_side && !self.filter.matches(&msg) {
                    continue;
                }
                survivors.push(msg);
            }

            // 6. One progress report per page for everything dropped
            let dropped = initial - survivors.len();
            if dropped > 0 {
                ctx.progress.on_progress(dropped);
            }

            // 7. Batches, in listing order
            emitted += survivors.len();
            for chunk in into_chunks(survivors, self.batch_size) {
                if !push(&self.output, chunk, &ctx.cancel).await {
                    return;
                }
            }
        }
    }
}

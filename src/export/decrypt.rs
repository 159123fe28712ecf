//! Decryption collaborator and the stage that applies it.
//!
//! A [`Decryptor`] either yields readable content, reports that no key can
//! open the message, or reports the body as unreadable. Individual
//! attachments may fail on their own; those shards are carried as `None` so
//! the writer can salvage the rest.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::model::message::{FullMessage, MessageMetadata};

use super::stage::{pop, push, StageContext};

/// Readable content of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    pub metadata: MessageMetadata,
    pub mime_type: String,
    pub body: Vec<u8>,
    pub attachments: Vec<DecryptedAttachment>,
}

impl DecryptedMessage {
    /// Whether every attachment shard was recovered.
    pub fn is_complete(&self) -> bool {
        self.attachments.iter().all(|a| a.data.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedAttachment {
    pub name: String,
    pub mime_type: String,
    /// `None` when this shard could not be decrypted.
    pub data: Option<Vec<u8>>,
}

/// What a [`Decryptor`] made of a message.
#[derive(Debug)]
pub enum DecryptOutcome {
    Decrypted(DecryptedMessage),
    /// No available key opens the message.
    MissingKey,
    /// The body could not be decrypted or parsed.
    Corrupt(String),
}

/// Decryption collaborator.
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, message: &FullMessage) -> DecryptOutcome;
}

/// Passes stored content through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextDecryptor;

impl Decryptor for PlaintextDecryptor {
    fn decrypt(&self, message: &FullMessage) -> DecryptOutcome {
        DecryptOutcome::Decrypted(DecryptedMessage {
            metadata: message.metadata.clone(),
            mime_type: message.mime_type.clone(),
            body: message.body.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|a| DecryptedAttachment {
                    name: a.name.clone(),
                    mime_type: a.mime_type.clone(),
                    data: Some(a.data.clone()),
                })
                .collect(),
        })
    }
}

/// Work item for the write stage.
#[derive(Debug)]
pub enum WriteJob {
    Decrypted(DecryptedMessage),
    MissingKey(FullMessage),
    Corrupt { message: FullMessage, reason: String },
}

impl WriteJob {
    pub fn id(&self) -> &str {
        match self {
            Self::Decrypted(m) => &m.metadata.id,
            Self::MissingKey(m) | Self::Corrupt { message: m, .. } => &m.metadata.id,
        }
    }
}

pub struct DecryptStage {
    decryptor: Arc<dyn Decryptor>,
    input: mpsc::Receiver<FullMessage>,
    output: mpsc::Sender<WriteJob>,
}

impl DecryptStage {
    pub fn new(
        decryptor: Arc<dyn Decryptor>,
        input: mpsc::Receiver<FullMessage>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<WriteJob>) {
        let (output, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                decryptor,
                input,
                output,
            },
            rx,
        )
    }

    pub async fn run(mut self, ctx: StageContext) {
        let mut processed = 0usize;
        while let Some(message) = pop(&mut self.input, &ctx.cancel).await {
            let job = match self.decryptor.decrypt(&message) {
                DecryptOutcome::Decrypted(decrypted) => WriteJob::Decrypted(decrypted),
                DecryptOutcome::MissingKey => {
                    warn!(id = %message.metadata.id, "No key for message, keeping it encrypted");
                    WriteJob::MissingKey(message)
                }
                DecryptOutcome::Corrupt(reason) => {
                    warn!(id = %message.metadata.id, reason = %reason, "Message body unreadable");
                    WriteJob::Corrupt { message, reason }
                }
            };
            if !push(&self.output, job, &ctx.cancel).await {
                return;
            }
            processed += 1;
        }
        debug!(processed, "Decrypt stage finished");
    }
}

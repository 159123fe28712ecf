//! A [`MessageStore`] served from a JSON mailbox dump.
//!
//! The dump is a single document:
//!
//! ```json
//! {
//!   "messages": [
//!     {
//!       "id": "m1",
//!       "time": 1704067200,
//!       "label_ids": ["0"],
//!       "sender": "Alice <alice@example.com>",
//!       "to": ["bob@example.com"],
//!       "subject": "Hello",
//!       "mime_type": "text/plain",
//!       "body": "Hi Bob",
//!       "attachments": [
//!         { "name": "notes.txt", "mime_type": "text/plain", "content": "..." },
//!         { "name": "logo.png", "mime_type": "image/png", "content": "iVBO...", "base64": true }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! Ids must be unique and usable as file names (see [`validate_message_id`]).
//! Listings are newest first with ties broken by descending id. The cursor is
//! inclusive: the page after cursor `c` starts with `c` itself, which the
//! [`Paginator`](super::Paginator) strips, followed by up to `page_size` further
//! entries so that a page size of one still makes progress.

use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{ExportError, Result};
use crate::filter::ServerFilter;
use crate::model::message::{AttachmentPart, FullMessage, MessageMetadata};
use crate::model::record::validate_message_id;

use super::MessageStore;

#[derive(Debug, Deserialize)]
struct DumpFile {
    #[serde(default)]
    messages: Vec<DumpMessage>,
}

#[derive(Debug, Deserialize)]
struct DumpMessage {
    #[serde(flatten)]
    metadata: MessageMetadata,
    #[serde(default = "default_mime_type")]
    mime_type: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    attachments: Vec<DumpAttachment>,
}

#[derive(Debug, Deserialize)]
struct DumpAttachment {
    name: String,
    #[serde(default = "default_attachment_type")]
    mime_type: String,
    #[serde(default)]
    content: String,
    /// `content` is base64 rather than literal text.
    #[serde(default)]
    base64: bool,
}

fn default_mime_type() -> String {
    "text/plain".to_string()
}

fn default_attachment_type() -> String {
    "application/octet-stream".to_string()
}

/// In-memory store loaded from a dump file.
#[derive(Debug, Clone, Default)]
pub struct DumpStore {
    /// Sorted newest first.
    messages: Vec<FullMessage>,
}

impl DumpStore {
    /// Build a store from already-materialized messages.
    ///
    /// Fails on an id that cannot name a backup file or that appears twice.
    pub fn new(mut messages: Vec<FullMessage>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(messages.len());
        for msg in &messages {
            let id = msg.metadata.id.as_str();
            validate_message_id(id).map_err(|e| ExportError::InvalidRecord {
                path: "<dump>".into(),
                reason: e.to_string(),
            })?;
            if !seen.insert(id) {
                return Err(ExportError::InvalidRecord {
                    path: "<dump>".into(),
                    reason: format!("duplicate message id '{id}'"),
                });
            }
        }

        messages.sort_by(|a, b| {
            b.metadata
                .time
                .cmp(&a.metadata.time)
                .then_with(|| b.metadata.id.cmp(&a.metadata.id))
        });
        Ok(Self { messages })
    }

    /// Load a JSON dump from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| ExportError::io(path, e))?;
        let store = Self::from_json(&data).map_err(|e| match e {
            ExportError::InvalidRecord { reason, .. } => ExportError::InvalidRecord {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        info!(path = %path.display(), messages = store.len(), "Loaded mailbox dump");
        Ok(store)
    }

    /// Parse a JSON dump held in memory.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let invalid = |reason: String| ExportError::InvalidRecord {
            path: "<dump>".into(),
            reason,
        };
        let file: DumpFile = serde_json::from_slice(data).map_err(|e| invalid(e.to_string()))?;

        let mut messages = Vec::with_capacity(file.messages.len());
        for raw in file.messages {
            let mut attachments = Vec::with_capacity(raw.attachments.len());
            for att in raw.attachments {
                let data = if att.base64 {
                    base64::engine::general_purpose::STANDARD
                        .decode(att.content.trim())
                        .map_err(|e| {
                            invalid(format!(
                                "attachment '{}' of '{}': {e}",
                                att.name, raw.metadata.id
                            ))
                        })?
                } else {
                    att.content.into_bytes()
                };
                attachments.push(AttachmentPart {
                    name: att.name,
                    mime_type: att.mime_type,
                    data,
                });
            }
            messages.push(FullMessage {
                metadata: raw.metadata,
                mime_type: raw.mime_type,
                body: raw.body.into_bytes(),
                attachments,
            });
        }
        Self::new(messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Metadata of every message, newest first.
    pub fn metadata(&self) -> Vec<MessageMetadata> {
        self.messages.iter().map(|m| m.metadata.clone()).collect()
    }
}

#[async_trait]
impl MessageStore for DumpStore {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        filter: &ServerFilter,
    ) -> Result<Vec<MessageMetadata>> {
        let mut listing: Vec<&MessageMetadata> = self
            .messages
            .iter()
            .map(|m| &m.metadata)
            .filter(|m| filter.accepts(m))
            .collect();
        if !filter.descending {
            listing.reverse();
        }

        let page_size = page_size.max(1);
        let (start, take) = match cursor {
            None => (0, page_size),
            Some(id) => {
                let pos = listing
                    .iter()
                    .position(|m| m.id == id)
                    .ok_or_else(|| ExportError::Transport(format!("unknown cursor '{id}'")))?;
                (pos, page_size + 1)
            }
        };

        let page: Vec<MessageMetadata> = listing
            .into_iter()
            .skip(start)
            .take(take)
            .cloned()
            .collect();
        debug!(cursor = cursor.unwrap_or(""), count = page.len(), "Served dump page");
        Ok(page)
    }

    async fn fetch_message(&self, id: &str) -> Result<FullMessage> {
        self.messages
            .iter()
            .find(|m| m.metadata.id == id)
            .cloned()
            .ok_or_else(|| ExportError::MessageNotFound(id.to_string()))
    }
}

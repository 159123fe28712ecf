//! Message metadata and full message payloads as served by the remote store.

use serde::{Deserialize, Serialize};

use super::address::EmailAddress;

/// Listing metadata for a single remote message.
///
/// Created by the remote store, fetched in pages and never mutated locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Store-assigned identifier, unique within the mailbox.
    pub id: String,

    /// Delivery time in seconds since the Unix epoch.
    #[serde(default)]
    pub time: i64,

    /// Label and folder identifiers carried by the message.
    #[serde(default)]
    pub label_ids: Vec<String>,

    /// Sender, if the store reported one.
    #[serde(default)]
    pub sender: Option<EmailAddress>,

    /// Primary recipients.
    #[serde(default)]
    pub to: Vec<EmailAddress>,

    /// Carbon-copy recipients.
    #[serde(default)]
    pub cc: Vec<EmailAddress>,

    /// Blind carbon-copy recipients.
    #[serde(default)]
    pub bcc: Vec<EmailAddress>,

    /// Subject line.
    #[serde(default)]
    pub subject: String,
}

impl MessageMetadata {
    /// All recipients in To, CC, BCC order.
    pub fn recipients(&self) -> impl Iterator<Item = &EmailAddress> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }
}

/// A message as fetched for export, still in its stored (possibly encrypted) form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullMessage {
    pub metadata: MessageMetadata,

    /// MIME type of the body (`text/plain` or `text/html`).
    pub mime_type: String,

    /// Stored body bytes.
    pub body: Vec<u8>,

    /// Stored attachment payloads, in message order.
    pub attachments: Vec<AttachmentPart>,
}

/// One stored attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentPart {
    /// Filename as declared by the sender.
    pub name: String,

    /// MIME content type (e.g. `"application/pdf"`).
    pub mime_type: String,

    /// Stored payload bytes.
    pub data: Vec<u8>,
}

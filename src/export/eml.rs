//! Assemble a decrypted message into an RFC 5322 `.eml` document.
//!
//! Built with `lettre`. Envelope headers come from the listing metadata. A
//! message without attachments is a single part; otherwise a
//! `multipart/mixed` body carries the text part followed by the attachments.
//! Header values are encoded by the builder and flattened to one line first.

use std::time::SystemTime;

use chrono::DateTime;
use lettre::address::Envelope;
use lettre::message::header::{ContentType, Header, HeaderName, HeaderValue};
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};
use tracing::warn;

use crate::error::{ExportError, Result};
use crate::model::address::EmailAddress;

use super::decrypt::DecryptedMessage;

const OCTET_STREAM: &str = "application/octet-stream";

type HeaderParseError = Box<dyn std::error::Error + Send + Sync>;

/// `X-Mailstash-Id`: store id of the exported message.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MailstashId(String);

impl Header for MailstashId {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Mailstash-Id")
    }

    fn parse(s: &str) -> std::result::Result<Self, HeaderParseError> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// `X-Mailstash-Labels`: comma-separated label ids.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MailstashLabels(String);

impl Header for MailstashLabels {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Mailstash-Labels")
    }

    fn parse(s: &str) -> std::result::Result<Self, HeaderParseError> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Build the full `.eml` bytes for a message.
///
/// Attachments without data are left out; callers assemble only complete
/// messages. Fails with [`ExportError::Assembly`] when the message has no
/// usable sender, which RFC 5322 requires.
pub fn assemble_eml(msg: &DecryptedMessage) -> Result<Vec<u8>> {
    let meta = &msg.metadata;
    let fail = |reason: String| ExportError::Assembly {
        id: meta.id.clone(),
        reason,
    };

    let sender = meta
        .sender
        .as_ref()
        .ok_or_else(|| fail("message has no sender".into()))?;
    let from = mailbox(sender)
        .ok_or_else(|| fail(format!("invalid sender address '{}'", sender.address)))?;
    // Never serialized; lets the builder accept messages without recipients
    let envelope = Envelope::new(Some(from.email.clone()), vec![from.email.clone()])
        .map_err(|e| fail(e.to_string()))?;

    let mut builder = Message::builder()
        .envelope(envelope)
        .keep_bcc()
        .from(from)
        .subject(single_line(&meta.subject))
        .header(MailstashId(meta.id.clone()));
    if let Some(date) = DateTime::from_timestamp(meta.time, 0) {
        builder = builder.date(SystemTime::from(date));
    }
    for to in meta.to.iter().filter_map(|a| recipient(&meta.id, a)) {
        builder = builder.to(to);
    }
    for cc in meta.cc.iter().filter_map(|a| recipient(&meta.id, a)) {
        builder = builder.cc(cc);
    }
    for bcc in meta.bcc.iter().filter_map(|a| recipient(&meta.id, a)) {
        builder = builder.bcc(bcc);
    }
    if !meta.label_ids.is_empty() {
        builder = builder.header(MailstashLabels(single_line(&meta.label_ids.join(","))));
    }

    let body = SinglePart::builder()
        .header(body_type(&msg.mime_type))
        .body(msg.body.clone());
    let attachments: Vec<SinglePart> = msg
        .attachments
        .iter()
        .filter_map(|att| {
            att.data.as_ref().map(|data| {
                Attachment::new(single_line(&att.name))
                    .body(data.clone(), attachment_type(&att.mime_type))
            })
        })
        .collect();

    let message = if attachments.is_empty() {
        builder.singlepart(body)
    } else {
        let mut mixed = MultiPart::mixed().singlepart(body);
        for part in attachments {
            mixed = mixed.singlepart(part);
        }
        builder.multipart(mixed)
    }
    .map_err(|e| fail(e.to_string()))?;

    Ok(message.formatted())
}

fn mailbox(addr: &EmailAddress) -> Option<Mailbox> {
    let email: Address = addr.address.trim().parse().ok()?;
    let name = single_line(addr.display_name.trim());
    Some(Mailbox::new((!name.is_empty()).then_some(name), email))
}

fn recipient(id: &str, addr: &EmailAddress) -> Option<Mailbox> {
    let mailbox = mailbox(addr);
    if mailbox.is_none() {
        warn!(id = %id, address = %addr.address, "Dropping unparsable recipient");
    }
    mailbox
}

/// Header text on one line: control characters become spaces.
fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

/// Body content type, declared UTF-8 unless the type carries parameters.
fn body_type(mime_type: &str) -> ContentType {
    let full = if mime_type.contains(';') {
        mime_type.to_string()
    } else {
        format!("{mime_type}; charset=utf-8")
    };
    ContentType::parse(&full).unwrap_or(ContentType::TEXT_PLAIN)
}

fn attachment_type(mime_type: &str) -> ContentType {
    ContentType::parse(mime_type)
        .or_else(|_| ContentType::parse(OCTET_STREAM))
        .unwrap_or(ContentType::TEXT_PLAIN)
}

/// Sanitize a string for use in filenames.
///
/// Replaces invalid characters with `_` and truncates to `max_len`.
pub fn sanitize_filename_part(s: &str, max_len: usize) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '.' || c == '_' || c == '@' {
                c
            } else {
                '_'
            }
        })
        .take(max_len)
        .collect();

    // Never produce "." or ".." as a path component
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "unknown".to_string()
    } else {
        sanitized
    }
}

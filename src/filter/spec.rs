//! The canonical filter model and its client-side evaluation.
//!
//! Categories (labels, senders, recipients, domains, date bounds, subject)
//! combine with AND. Values inside one category combine with OR. An unset
//! category places no constraint.

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};
use crate::model::address::EmailAddress;
use crate::model::message::MessageMetadata;

use super::query::parse_timestamp;

/// Export filter criteria. Empty fields mean "unset".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpec {
    /// The message must carry at least one of these labels.
    pub label_ids: Vec<String>,

    /// Sender patterns: `user@domain.tld` or `@domain.tld`.
    pub senders: Vec<String>,

    /// Recipient patterns, matched against To, CC and BCC.
    pub recipients: Vec<String>,

    /// Bare domains matched against the sender and every recipient.
    pub domains: Vec<String>,

    /// Inclusive lower bound on message time (Unix seconds).
    pub after: Option<i64>,

    /// Exclusive upper bound on message time (Unix seconds).
    pub before: Option<i64>,

    /// Case-insensitive substring of the subject.
    pub subject: Option<String>,
}

impl FilterSpec {
    /// Build a filter from comma-separated inputs as a CLI or embedding layer
    /// passes them. Blank items are dropped; the result is validated.
    pub fn from_lists(
        label_ids: &str,
        senders: &str,
        recipients: &str,
        domains: &str,
        after: &str,
        before: &str,
        subject: &str,
    ) -> Result<Self> {
        let parse_bound = |s: &str| -> Result<Option<i64>> {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                parse_timestamp(s).map(Some)
            }
        };

        let spec = Self {
            label_ids: split_list(label_ids),
            senders: split_list(senders),
            recipients: split_list(recipients),
            domains: split_list(domains),
            after: parse_bound(after)?,
            before: parse_bound(before)?,
            subject: (!subject.is_empty()).then(|| subject.to_string()),
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Fold `other` into `self`, as when flags and a query string are both
    /// given. Lists accumulate, date bounds take the tighter value and
    /// subjects are joined with a space.
    pub fn merge(&mut self, other: FilterSpec) {
        self.label_ids.extend(other.label_ids);
        self.senders.extend(other.senders);
        self.recipients.extend(other.recipients);
        self.domains.extend(other.domains);
        self.after = match (self.after, other.after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.before = match (self.before, other.before) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.subject = match (self.subject.take(), other.subject) {
            (Some(a), Some(b)) => Some(format!("{a} {b}")),
            (a, b) => a.or(b),
        };
    }

    /// `true` if no criterion is set: every message matches.
    pub fn is_empty(&self) -> bool {
        self.label_ids.is_empty()
            && self.senders.is_empty()
            && self.recipients.is_empty()
            && self.domains.is_empty()
            && self.after.is_none()
            && self.before.is_none()
            && self.subject_needle().is_none()
    }

    /// Reject inconsistent bounds and malformed address or domain patterns.
    pub fn validate(&self) -> Result<()> {
        if let (Some(after), Some(before)) = (self.after, self.before) {
            if after > before {
                return Err(ExportError::InvalidFilter(format!(
                    "after ({after}) must not be later than before ({before})"
                )));
            }
        }

        if self.label_ids.iter().any(|l| l.trim().is_empty()) {
            return Err(ExportError::InvalidFilter("empty label id".into()));
        }

        for sender in &self.senders {
            validate_pattern(sender)
                .map_err(|e| ExportError::InvalidFilter(format!("sender {sender:?}: {e}")))?;
        }
        for recipient in &self.recipients {
            validate_pattern(recipient).map_err(|e| {
                ExportError::InvalidFilter(format!("recipient {recipient:?}: {e}"))
            })?;
        }
        for domain in &self.domains {
            validate_domain(domain)
                .map_err(|e| ExportError::InvalidFilter(format!("domain {domain:?}: {e}")))?;
        }

        Ok(())
    }

    /// Evaluate every criterion against one message.
    ///
    /// Total: a message lacking a field simply fails any criterion on it.
    pub fn matches(&self, msg: &MessageMetadata) -> bool {
        // 1. Date bounds (cheapest)
        if self.after.is_some_and(|after| msg.time < after) {
            return false;
        }
        if self.before.is_some_and(|before| msg.time >= before) {
            return false;
        }

        // 2. Labels
        if !self.label_ids.is_empty() && !self.label_ids.iter().any(|l| has_label(msg, l)) {
            return false;
        }

        // 3. Sender
        if !self.senders.is_empty() {
            let Some(sender) = &msg.sender else {
                return false;
            };
            if !self.senders.iter().any(|p| matches_pattern(sender, p)) {
                return false;
            }
        }

        // 4. Recipients
        if !self.recipients.is_empty()
            && !msg
                .recipients()
                .any(|r| self.recipients.iter().any(|p| matches_pattern(r, p)))
        {
            return false;
        }

        // 5. Domains, on either side of the message
        if !self.domains.is_empty() && !self.matches_domains(msg) {
            return false;
        }

        // 6. Subject
        if let Some(needle) = self.subject_needle() {
            if !msg.subject.to_lowercase().contains(&needle) {
                return false;
            }
        }

        true
    }

    /// Lowercased subject needle, if a non-empty one is set.
    pub(crate) fn subject_needle(&self) -> Option<String> {
        self.subject
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    fn matches_domains(&self, msg: &MessageMetadata) -> bool {
        let wanted: Vec<String> = self
            .domains
            .iter()
            .map(|d| d.trim().to_lowercase())
            .collect();
        msg.sender
            .iter()
            .chain(msg.recipients())
            .filter_map(EmailAddress::domain)
            .any(|d| wanted.contains(&d))
    }
}

/// Indices of the messages matching `spec`, in input order.
pub fn matching_indices(messages: &[MessageMetadata], spec: &FilterSpec) -> Vec<usize> {
    messages
        .iter()
        .enumerate()
        .filter(|(_, msg)| spec.matches(msg))
        .map(|(i, _)| i)
        .collect()
}

/// Label comparison shared by client and server evaluation.
pub(crate) fn has_label(msg: &MessageMetadata, label: &str) -> bool {
    let label = label.trim();
    msg.label_ids.iter().any(|l| l.eq_ignore_ascii_case(label))
}

/// Match an address against `user@domain` (exact) or `@domain` (domain part
/// equality, not a suffix match).
fn matches_pattern(address: &EmailAddress, pattern: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    match pattern.strip_prefix('@') {
        Some(domain) => address.domain().is_some_and(|d| d == domain),
        None => address.normalized() == pattern,
    }
}

fn validate_pattern(pattern: &str) -> std::result::Result<(), String> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Err("empty value".into());
    }
    if let Some(domain) = pattern.strip_prefix('@') {
        return validate_domain(domain);
    }

    let mut parts = pattern.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => {
            if domain.contains('.') {
                Ok(())
            } else {
                Err("domain part must contain a '.'".into())
            }
        }
        (_, None, _) => Err("must be an email address or a domain starting with '@'".into()),
        _ => Err("invalid email format".into()),
    }
}

fn validate_domain(domain: &str) -> std::result::Result<(), String> {
    let domain = domain.trim();
    if domain.is_empty() {
        return Err("empty domain".into());
    }
    if domain.contains('@') {
        return Err("domain should not contain '@'".into());
    }
    if !domain.contains('.') {
        return Err("invalid domain format".into());
    }
    Ok(())
}

/// Split a comma-separated list, trimming items and dropping blanks.
pub(crate) fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

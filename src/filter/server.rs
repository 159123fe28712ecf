//! Projection of a [`FilterSpec`] onto what the remote store evaluates itself.
//!
//! The store understands a single label and a subject substring, and always
//! lists newest first. Anything richer is re-checked client-side against
//! every page.

use serde::{Deserialize, Serialize};

use crate::model::message::MessageMetadata;

use super::spec::{has_label, FilterSpec};

/// The server-evaluable subset of a filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFilter {
    /// Restrict the listing to one label.
    pub label_id: Option<String>,
    /// Case-insensitive subject substring.
    pub subject: Option<String>,
    /// Newest first. Always `true` for export listings.
    pub descending: bool,
}

impl Default for ServerFilter {
    fn default() -> Self {
        Self {
            label_id: None,
            subject: None,
            descending: true,
        }
    }
}

impl ServerFilter {
    /// `true` if the store is asked to narrow the listing at all.
    pub fn is_narrowing(&self) -> bool {
        self.label_id.is_some() || self.subject.is_some()
    }

    /// The predicate a store applies for this projection.
    pub fn accepts(&self, msg: &MessageMetadata) -> bool {
        if let Some(label) = &self.label_id {
            if !has_label(msg, label) {
                return false;
            }
        }
        if let Some(subject) = &self.subject {
            if !msg.subject.to_lowercase().contains(&subject.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

impl FilterSpec {
    /// Split into the server projection and whether the full spec must also
    /// be evaluated against every returned page.
    pub fn to_server_filter(&self) -> (ServerFilter, bool) {
        let mut server = ServerFilter::default();

        if let [label] = self.label_ids.as_slice() {
            server.label_id = Some(label.trim().to_string());
        }
        if self.subject_needle().is_some() {
            server.subject = self.subject.clone();
        }

        (server, self.needs_client_side())
    }

    /// Whether any criterion is beyond what the store can evaluate.
    pub fn needs_client_side(&self) -> bool {
        self.label_ids.len() > 1
            || !self.senders.is_empty()
            || !self.recipients.is_empty()
            || !self.domains.is_empty()
            || self.after.is_some()
            || self.before.is_some()
            || (self.subject_needle().is_some() && !self.label_ids.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::address::EmailAddress;

    fn labels(ids: &[&str]) -> FilterSpec {
        FilterSpec {
            label_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_label_is_server_only() {
        let (server, client) = labels(&["0"]).to_server_filter();
        assert!(!client);
        assert_eq!(server.label_id.as_deref(), Some("0"));
        assert!(server.descending);
    }

    #[test]
    fn test_multiple_labels_need_client() {
        let (server, client) = labels(&["0", "5"]).to_server_filter();
        assert!(client);
        assert!(server.label_id.is_none());
    }

    #[test]
    fn test_subject_alone_is_server_only() {
        let spec = FilterSpec {
            subject: Some("invoice".into()),
            ..Default::default()
        };
        let (server, client) = spec.to_server_filter();
        assert!(!client);
        assert_eq!(server.subject.as_deref(), Some("invoice"));
    }

    #[test]
    fn test_subject_with_label_needs_client() {
        let spec = FilterSpec {
            subject: Some("invoice".into()),
            ..labels(&["0"])
        };
        assert!(spec.to_server_filter().1);
    }

    #[test]
    fn test_client_only_categories() {
        let cases = [
            FilterSpec {
                senders: vec!["a@b.com".into()],
                ..Default::default()
            },
            FilterSpec {
                recipients: vec!["@b.com".into()],
                ..Default::default()
            },
            FilterSpec {
                domains: vec!["b.com".into()],
                ..Default::default()
            },
            FilterSpec {
                after: Some(1),
                ..Default::default()
            },
            FilterSpec {
                before: Some(1),
                ..Default::default()
            },
        ];
        for spec in cases {
            let (server, client) = spec.to_server_filter();
            assert!(client, "{spec:?}");
            assert!(!server.is_narrowing(), "{spec:?}");
        }
    }

    #[test]
    fn test_empty_spec_projects_to_plain_listing() {
        let (server, client) = FilterSpec::default().to_server_filter();
        assert_eq!(server, ServerFilter::default());
        assert!(!client);
    }

    /// Server pre-filtering followed by the client pass must agree with
    /// evaluating the full spec directly.
    #[test]
    fn test_server_then_client_agrees_with_direct_match() {
        let make = |id: &str, labels: &[&str], subject: &str, sender: &str, time: i64| {
            MessageMetadata {
                id: id.into(),
                time,
                label_ids: labels.iter().map(|s| s.to_string()).collect(),
                sender: Some(EmailAddress::new(sender)),
                subject: subject.into(),
                ..Default::default()
            }
        };
        let messages = vec![
            make("a", &["0"], "Invoice 1", "alice@example.com", 100),
            make("b", &["0", "5"], "hello", "bob@example.com", 200),
            make("c", &["2"], "invoice 2", "alice@proton.me", 300),
            make("d", &[], "misc", "carol@example.com", 400),
            make("e", &["5"], "INVOICE final", "dave@example.com", 500),
        ];

        let specs = vec![
            FilterSpec::default(),
            labels(&["0"]),
            labels(&["0", "2"]),
            FilterSpec {
                subject: Some("invoice".into()),
                ..Default::default()
            },
            FilterSpec {
                subject: Some("invoice".into()),
                ..labels(&["5"])
            },
            FilterSpec {
                senders: vec!["@example.com".into()],
                after: Some(200),
                ..labels(&["0"])
            },
            FilterSpec {
                domains: vec!["proton.me".into()],
                before: Some(400),
                ..Default::default()
            },
        ];

        for spec in &specs {
            let (server, client) = spec.to_server_filter();
            for msg in &messages {
                let combined = server.accepts(msg) && (!client || spec.matches(msg));
                assert_eq!(combined, spec.matches(msg), "spec {spec:?} msg {}", msg.id);
            }
        }
    }
}

//! Email address parsing and normalization.

use serde::{Deserialize, Serialize};

/// A mailbox address as reported by the remote store.
///
/// # Examples
/// - `"Juan García <juan@ejemplo.com>"` → `display_name = "Juan García"`, `address = "juan@ejemplo.com"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "AddressRepr")]
pub struct EmailAddress {
    /// Human-readable display name (may be empty).
    pub display_name: String,
    /// The bare email address (`user@domain`).
    pub address: String,
}

/// Accepted on-disk shapes: a header-style string or a structured object.
#[derive(Deserialize)]
#[serde(untagged)]
enum AddressRepr {
    Raw(String),
    Structured {
        #[serde(default)]
        display_name: String,
        address: String,
    },
}

impl From<AddressRepr> for EmailAddress {
    fn from(repr: AddressRepr) -> Self {
        match repr {
            AddressRepr::Raw(raw) => Self::parse(&raw),
            AddressRepr::Structured {
                display_name,
                address,
            } => Self {
                display_name,
                address,
            },
        }
    }
}

impl EmailAddress {
    /// Build an address without a display name.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            display_name: String::new(),
            address: address.into(),
        }
    }

    /// Parse a single address from a header-style value.
    ///
    /// Supported formats:
    /// - `"user@domain.com"`
    /// - `"<user@domain.com>"`
    /// - `"Display Name <user@domain.com>"`
    /// - `"\"Display, Name\" <user@domain.com>"`
    ///
    /// Anything else is kept verbatim as the address.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: strip_quotes(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        Self::new(trimmed)
    }

    /// Lowercased, trimmed address used for every comparison.
    pub fn normalized(&self) -> String {
        self.address.trim().to_lowercase()
    }

    /// Lowercased domain part (after the last `@`), if there is one.
    pub fn domain(&self) -> Option<String> {
        domain_of(&self.address)
    }

    /// Format for display: `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Extract the lowercased domain of an address.
///
/// Returns `None` when there is no `@` or nothing follows it.
pub fn domain_of(address: &str) -> Option<String> {
    let address = address.trim();
    let at = address.rfind('@')?;
    let domain = &address[at + 1..];
    if domain.is_empty() {
        None
    } else {
        Some(domain.to_lowercase())
    }
}

/// Strip surrounding double-quotes and trim whitespace.
fn strip_quotes(s: &str) -> String {
    let trimmed = s.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_address() {
        let addr = EmailAddress::parse("user@example.com");
        assert_eq!(addr.address, "user@example.com");
        assert_eq!(addr.display_name, "");
    }

    #[test]
    fn test_parse_name_and_address() {
        let addr = EmailAddress::parse("\"Last, First\" <User@Example.com>");
        assert_eq!(addr.address, "User@Example.com");
        assert_eq!(addr.display_name, "Last, First");
        assert_eq!(addr.normalized(), "user@example.com");
    }

    #[test]
    fn test_domain_extraction() {
        assert_eq!(domain_of("a@Example.COM"), Some("example.com".into()));
        assert_eq!(domain_of(" a@b@c.org "), Some("c.org".into()));
        assert_eq!(domain_of("nobody"), None);
        assert_eq!(domain_of("trailing@"), None);
    }

    #[test]
    fn test_deserialize_either_shape() {
        let raw: EmailAddress = serde_json::from_str("\"Alice <alice@x.com>\"").unwrap();
        assert_eq!(raw.display_name, "Alice");
        assert_eq!(raw.address, "alice@x.com");

        let structured: EmailAddress =
            serde_json::from_str(r#"{"address":"bob@x.com"}"#).unwrap();
        assert_eq!(structured, EmailAddress::new("bob@x.com"));
    }

    #[test]
    fn test_display() {
        let addr = EmailAddress::parse("Alice <alice@example.com>");
        assert_eq!(addr.to_string(), "Alice <alice@example.com>");
        assert_eq!(EmailAddress::new("a@b.c").display(), "a@b.c");
    }
}

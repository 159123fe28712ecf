//! Filter query parser.
//!
//! Parses a search-bar style string into a [`FilterSpec`].
//!
//! # Supported syntax
//!
//! - `label:0` / `label:0,5` — label ids (OR)
//! - `from:user@example.com` / `from:@example.com` — sender patterns
//! - `to:dest@example.com` — recipient patterns (To, CC, BCC)
//! - `domain:example.com` — sender or recipient domain
//! - `after:2024-01-01` — inclusive lower bound
//! - `before:2024-06-30` — exclusive upper bound
//! - `subject:"quarterly report"` — subject substring
//!
//! Bare words are joined into the subject substring. Values for the list
//! fields may repeat or be comma-separated.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::{ExportError, Result};

use super::spec::{split_list, FilterSpec};

/// Parse a query string into a validated [`FilterSpec`].
pub fn parse_filter_query(input: &str) -> Result<FilterSpec> {
    let mut spec = FilterSpec::default();
    let mut subject_words: Vec<String> = Vec::new();

    for token in tokenize(input.trim()) {
        let Some((key, value)) = token.split_once(':') else {
            subject_words.push(unquote(&token));
            continue;
        };
        let value = unquote(value);

        match key.to_ascii_lowercase().as_str() {
            "label" => spec.label_ids.extend(split_list(&value)),
            "from" => spec.senders.extend(split_list(&value)),
            "to" => spec.recipients.extend(split_list(&value)),
            "domain" => spec.domains.extend(split_list(&value)),
            "after" => spec.after = Some(parse_timestamp(&value)?),
            "before" => spec.before = Some(parse_timestamp(&value)?),
            "subject" => subject_words.push(value),
            // Unknown prefix: plain text
            _ => subject_words.push(unquote(&token)),
        }
    }

    let subject = subject_words.join(" ");
    if !subject.is_empty() {
        spec.subject = Some(subject);
    }

    spec.validate()?;
    Ok(spec)
}

/// Strip one pair of surrounding double quotes.
fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

/// Tokenize input respecting quoted strings.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
            current.push(ch);
        } else if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parse a timestamp into Unix seconds.
///
/// Accepts, in order: RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY/MM/DD HH:MM:SS`,
/// `YYYY-MM-DD`, `YYYY/MM/DD`, `YYYYMMDD`, then a plain Unix epoch integer.
/// Dates without a time are midnight UTC.
pub fn parse_timestamp(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ExportError::InvalidTimestamp(s.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(dt.and_utc().timestamp());
        }
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return Ok(midnight_utc(d));
        }
    }

    // Compact YYYYMMDD wins over an 8-digit epoch value
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        let year = s[..4].parse().ok();
        let month = s[4..6].parse().ok();
        let day = s[6..].parse().ok();
        if let (Some(y), Some(m), Some(d)) = (year, month, day) {
            if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
                return Ok(midnight_utc(date));
            }
        }
    }

    s.parse::<i64>()
        .map_err(|_| ExportError::InvalidTimestamp(s.to_string()))
}

fn midnight_utc(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

//! Message normalization — raw RFC 822 payloads to flat records.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;

use crate::error::IngestError;
use crate::gmail::types::RawMessage;
use crate::ingest::decode_base64_lenient;

/// A flat, storage-ready view of one Gmail message.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedMessage {
    /// Gmail's message id, the idempotency key.
    pub gmail_id: String,
    pub thread_id: Option<String>,
    /// RFC 822 `Message-ID` header.
    pub message_id_header: Option<String>,
    pub sender: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    /// Plain-text body; HTML-only messages are stripped to text.
    pub body: String,
    pub snippet: Option<String>,
    pub label_ids: Vec<String>,
    pub internal_date: DateTime<Utc>,
}

/// Parse a `messages.get?format=raw` response into a `NormalizedMessage`.
pub fn normalize_raw(raw: &RawMessage) -> Result<NormalizedMessage, IngestError> {
    let encoded = raw.raw.as_deref().ok_or_else(|| IngestError::Normalize {
        gmail_id: raw.id.clone(),
        reason: "missing raw payload".to_string(),
    })?;

    let bytes = decode_base64_lenient(encoded).ok_or_else(|| IngestError::Normalize {
        gmail_id: raw.id.clone(),
        reason: "raw payload is not valid base64".to_string(),
    })?;

    let parsed = MessageParser::default()
        .parse(&bytes)
        .ok_or_else(|| IngestError::Normalize {
            gmail_id: raw.id.clone(),
            reason: "unparseable RFC 822 payload".to_string(),
        })?;

    let sender = extract_addresses(parsed.from())
        .into_iter()
        .next()
        .ok_or_else(|| IngestError::Normalize {
            gmail_id: raw.id.clone(),
            reason: "missing From header".to_string(),
        })?;

    let body = parsed
        .body_text(0)
        .map(|text| text.to_string())
        .or_else(|| parsed.body_html(0).map(|html| strip_html(&html)))
        .unwrap_or_default();

    let internal_date = raw
        .internal_date
        .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
        .or_else(|| {
            parsed
                .date()
                .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
        })
        .unwrap_or_else(Utc::now);

    Ok(NormalizedMessage {
        gmail_id: raw.id.clone(),
        thread_id: raw.thread_id.clone(),
        message_id_header: parsed.message_id().map(|s| s.to_string()),
        sender,
        to: extract_addresses(parsed.to()),
        cc: extract_addresses(parsed.cc()),
        subject: parsed.subject().map(|s| s.to_string()),
        body,
        snippet: raw.snippet.clone(),
        label_ids: raw.label_ids.clone(),
        internal_date,
    })
}

/// Extract email addresses from an optional mail_parser Address field.
pub fn extract_addresses(addr: Option<&mail_parser::Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        mail_parser::Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        mail_parser::Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}

/// Check if a sender email is in the allowlist.
///
/// - Empty list → deny all
/// - `*` in list → allow all
/// - `@domain.com` or `domain.com` → domain match
/// - `user@domain.com` → exact email match
pub fn is_sender_allowed(allowed: &[String], email: &str) -> bool {
    if allowed.is_empty() {
        return false;
    }
    if allowed.iter().any(|a| a == "*") {
        return true;
    }
    let email_lower = email.to_lowercase();
    allowed.iter().any(|a| {
        if a.starts_with('@') {
            email_lower.ends_with(&a.to_lowercase())
        } else if a.contains('@') {
            a.eq_ignore_ascii_case(email)
        } else {
            email_lower.ends_with(&format!("@{}", a.to_lowercase()))
        }
    })
}

/// Strip HTML tags and normalize whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

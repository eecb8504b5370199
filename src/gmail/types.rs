//! Wire types for the Gmail REST API responses we consume.
//!
//! Gmail serializes uint64 fields (`historyId`, `internalDate`, `expiration`)
//! as JSON strings; the lenient deserializers below accept both strings and
//! numbers so stubbed test payloads can use either.

use serde::{Deserialize, Deserializer};

/// Response of `users.history.list`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryListResponse {
    #[serde(default)]
    pub history: Vec<HistoryRecord>,
    #[serde(default)]
    pub next_page_token: Option<String>,
    /// The mailbox's current historyId at the time of the call.
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub history_id: Option<u64>,
}

/// One history record; we only ask for (and read) `messagesAdded`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub id: Option<u64>,
    #[serde(default)]
    pub messages_added: Vec<HistoryMessageAdded>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryMessageAdded {
    pub message: MessageRef,
}

/// Minimal message reference as it appears inside history records.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
}

/// Response of `users.messages.get?format=raw`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    /// Epoch milliseconds of internal receipt.
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub internal_date: Option<u64>,
    /// base64url-encoded RFC 822 payload.
    #[serde(default)]
    pub raw: Option<String>,
}

/// Response of `users.watch`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    #[serde(deserialize_with = "de_u64")]
    pub history_id: u64,
    /// Epoch milliseconds when the watch expires.
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub expiration: Option<u64>,
}

/// OAuth token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

// ── Lenient uint64 deserialization ──────────────────────────────────

#[derive(Deserialize)]
#[serde(untagged)]
enum NumOrString {
    Num(u64),
    Str(String),
}

pub(crate) fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumOrString::deserialize(deserializer)? {
        NumOrString::Num(n) => Ok(n),
        NumOrString::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

pub(crate) fn de_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumOrString::Num(n)) => Ok(Some(n)),
        Some(NumOrString::Str(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

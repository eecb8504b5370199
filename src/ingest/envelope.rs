//! Pub/Sub push envelope decoding.
//!
//! A push delivery wraps the actual Gmail notification twice: the HTTP body
//! is a JSON envelope whose `message.data` field base64-encodes a second
//! JSON document carrying the mailbox address and its new `historyId`.

use serde::Deserialize;

use crate::error::IngestError;
use crate::ingest::decode_base64_lenient;

/// Outer Pub/Sub push envelope.
#[derive(Debug, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub data: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub publish_time: Option<String>,
}

/// The decoded Gmail notification: which mailbox changed and its new cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxNotification {
    pub email_address: String,
    pub history_id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationData {
    email_address: String,
    #[serde(deserialize_with = "crate::gmail::types::de_u64")]
    history_id: u64,
}

/// Decode a raw request body into a `MailboxNotification`.
pub fn decode_envelope(body: &[u8]) -> Result<MailboxNotification, IngestError> {
    let envelope: PushEnvelope = serde_json::from_slice(body)
        .map_err(|e| IngestError::Envelope(format!("not a push envelope: {e}")))?;

    let payload = decode_base64_lenient(&envelope.message.data)
        .ok_or_else(|| IngestError::Envelope("message.data is not valid base64".to_string()))?;

    let data: NotificationData = serde_json::from_slice(&payload)
        .map_err(|e| IngestError::Envelope(format!("invalid notification payload: {e}")))?;

    Ok(MailboxNotification {
        email_address: data.email_address,
        history_id: data.history_id,
    })
}

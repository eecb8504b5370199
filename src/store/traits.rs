//! `MailStore` trait — the async persistence interface for ingested messages
//! and per-mailbox sync state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::ingest::normalize::NormalizedMessage;

/// Result of an idempotent message upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// First time this gmail_id was seen.
    Inserted,
    /// Row already existed; mutable fields were refreshed.
    Updated,
}

/// A persisted Gmail message row.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEmail {
    pub id: String,
    /// Provider message id, unique per row.
    pub gmail_id: String,
    pub mailbox: String,
    pub thread_id: Option<String>,
    pub message_id_header: Option<String>,
    pub sender: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: Option<String>,
    pub body: String,
    pub snippet: Option<String>,
    pub label_ids: Vec<String>,
    pub internal_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-mailbox sync state: the history cursor and the current watch.
#[derive(Debug, Clone, Serialize)]
pub struct MailboxState {
    pub address: String,
    pub last_history_id: u64,
    pub watch_expiration: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic persistence for messages and mailbox cursors.
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Upsert a normalized message keyed by its gmail_id. Redelivered
    /// notifications refresh mutable fields instead of creating new rows.
    async fn upsert_message(
        &self,
        mailbox: &str,
        message: &NormalizedMessage,
    ) -> Result<UpsertResult, DatabaseError>;

    /// Look up a message by its provider id.
    async fn get_message_by_gmail_id(
        &self,
        gmail_id: &str,
    ) -> Result<Option<StoredEmail>, DatabaseError>;

    /// Most-recent-first messages, optionally restricted to one mailbox.
    async fn list_messages(
        &self,
        mailbox: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredEmail>, DatabaseError>;

    /// Delete messages older than `keep_days`. Returns rows deleted.
    async fn prune_messages(&self, keep_days: u32) -> Result<usize, DatabaseError>;

    // ── Mailboxes ───────────────────────────────────────────────────

    /// Get the sync state for a mailbox, if known.
    async fn get_mailbox(&self, address: &str) -> Result<Option<MailboxState>, DatabaseError>;

    /// All known mailboxes.
    async fn list_mailboxes(&self) -> Result<Vec<MailboxState>, DatabaseError>;

    /// Register a mailbox with an initial cursor. No-op if already known.
    async fn seed_mailbox(&self, address: &str, history_id: u64) -> Result<(), DatabaseError>;

    /// Advance the cursor. Monotonic: an older history_id never wins.
    async fn advance_cursor(&self, address: &str, history_id: u64) -> Result<(), DatabaseError>;

    /// Record when the current Gmail watch expires.
    async fn set_watch_expiration(
        &self,
        address: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
}

//! libSQL backend — async `MailStore` implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations; `libsql::Connection` is `Send + Sync` and safe
//! for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{params, Connection, Database as LibSqlDatabase};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::ingest::normalize::NormalizedMessage;
use crate::store::migrations;
use crate::store::traits::{MailStore, MailboxState, StoredEmail, UpsertResult};

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string, defaulting to the epoch minimum.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Serialize an address/label list to its JSON column form.
fn to_json_list(items: &[String]) -> Result<String, DatabaseError> {
    serde_json::to_string(items).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Parse a JSON list column, tolerating legacy/garbage values.
fn from_json_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

const EMAIL_COLUMNS: &str = "id, gmail_id, mailbox, thread_id, message_id_header, sender, \
     to_addrs, cc_addrs, subject, body, snippet, label_ids, internal_date, created_at, updated_at";

fn row_to_email(row: &libsql::Row) -> Result<StoredEmail, libsql::Error> {
    let to_raw: String = row.get(6)?;
    let cc_raw: String = row.get(7)?;
    let labels_raw: String = row.get(11)?;
    let internal_str: String = row.get(12)?;
    let created_str: String = row.get(13)?;
    let updated_str: String = row.get(14)?;

    Ok(StoredEmail {
        id: row.get(0)?,
        gmail_id: row.get(1)?,
        mailbox: row.get(2)?,
        thread_id: row.get(3).ok(),
        message_id_header: row.get(4).ok(),
        sender: row.get(5)?,
        to: from_json_list(&to_raw),
        cc: from_json_list(&cc_raw),
        subject: row.get(8).ok(),
        body: row.get(9)?,
        snippet: row.get(10).ok(),
        label_ids: from_json_list(&labels_raw),
        internal_date: parse_datetime(&internal_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_mailbox(row: &libsql::Row) -> Result<MailboxState, libsql::Error> {
    let history_id: i64 = row.get(1)?;
    let watch_str: Option<String> = row.get(2).ok();
    let created_str: String = row.get(3)?;
    let updated_str: String = row.get(4)?;

    Ok(MailboxState {
        address: row.get(0)?,
        last_history_id: history_id as u64,
        watch_expiration: parse_optional_datetime(&watch_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

const MAILBOX_COLUMNS: &str = "address, last_history_id, watch_expiration, created_at, updated_at";

#[async_trait]
impl MailStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn upsert_message(
        &self,
        mailbox: &str,
        message: &NormalizedMessage,
    ) -> Result<UpsertResult, DatabaseError> {
        let conn = self.conn();

        // The unique constraint on gmail_id is what guarantees idempotence
        // under concurrent deliveries; this pre-check only decides the label.
        let existed = self.get_message_by_gmail_id(&message.gmail_id).await?.is_some();

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO messages (id, gmail_id, mailbox, thread_id, message_id_header, sender,
                to_addrs, cc_addrs, subject, body, snippet, label_ids, internal_date,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?14)
             ON CONFLICT (gmail_id) DO UPDATE SET
                thread_id = excluded.thread_id,
                snippet = excluded.snippet,
                label_ids = excluded.label_ids,
                updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                message.gmail_id.clone(),
                mailbox,
                opt_text(message.thread_id.as_deref()),
                opt_text(message.message_id_header.as_deref()),
                message.sender.clone(),
                to_json_list(&message.to)?,
                to_json_list(&message.cc)?,
                opt_text(message.subject.as_deref()),
                message.body.clone(),
                opt_text(message.snippet.as_deref()),
                to_json_list(&message.label_ids)?,
                message.internal_date.to_rfc3339(),
                now,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_message: {e}")))?;

        if existed {
            debug!(gmail_id = %message.gmail_id, "Message already stored, refreshed");
            Ok(UpsertResult::Updated)
        } else {
            debug!(gmail_id = %message.gmail_id, "Message inserted into DB");
            Ok(UpsertResult::Inserted)
        }
    }

    async fn get_message_by_gmail_id(
        &self,
        gmail_id: &str,
    ) -> Result<Option<StoredEmail>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM messages WHERE gmail_id = ?1"),
                params![gmail_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message_by_gmail_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let email = row_to_email(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(email))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message_by_gmail_id: {e}"))),
        }
    }

    async fn list_messages(
        &self,
        mailbox: Option<&str>,
        limit: usize,
    ) -> Result<Vec<StoredEmail>, DatabaseError> {
        let conn = self.conn();
        let mut rows = match mailbox {
            Some(mailbox) => conn
                .query(
                    &format!(
                        "SELECT {EMAIL_COLUMNS} FROM messages WHERE mailbox = ?1
                         ORDER BY internal_date DESC LIMIT ?2"
                    ),
                    params![mailbox, limit as i64],
                )
                .await,
            None => conn
                .query(
                    &format!(
                        "SELECT {EMAIL_COLUMNS} FROM messages
                         ORDER BY internal_date DESC LIMIT ?1"
                    ),
                    params![limit as i64],
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_email(&row) {
                Ok(email) => messages.push(email),
                Err(e) => tracing::warn!("Skipping message row: {e}"),
            }
        }
        Ok(messages)
    }

    async fn prune_messages(&self, keep_days: u32) -> Result<usize, DatabaseError> {
        if keep_days == 0 {
            return Ok(0);
        }
        let cutoff = (Utc::now() - chrono::Duration::days(keep_days as i64)).to_rfc3339();
        let conn = self.conn();
        let count = conn
            .execute(
                "DELETE FROM messages WHERE internal_date < ?1",
                params![cutoff],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune_messages: {e}")))?;

        if count > 0 {
            info!(count, keep_days, "Pruned old messages from DB");
        }
        Ok(count as usize)
    }

    // ── Mailboxes ───────────────────────────────────────────────────

    async fn get_mailbox(&self, address: &str) -> Result<Option<MailboxState>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE address = ?1"),
                params![address],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_mailbox: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let mailbox = row_to_mailbox(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(mailbox))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_mailbox: {e}"))),
        }
    }

    async fn list_mailboxes(&self) -> Result<Vec<MailboxState>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {MAILBOX_COLUMNS} FROM mailboxes ORDER BY address ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_mailboxes: {e}")))?;

        let mut mailboxes = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_mailbox(&row) {
                Ok(mailbox) => mailboxes.push(mailbox),
                Err(e) => tracing::warn!("Skipping mailbox row: {e}"),
            }
        }
        Ok(mailboxes)
    }

    async fn seed_mailbox(&self, address: &str, history_id: u64) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO mailboxes (address, last_history_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT (address) DO NOTHING",
                params![address, history_id as i64, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("seed_mailbox: {e}")))?;
        Ok(())
    }

    async fn advance_cursor(&self, address: &str, history_id: u64) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO mailboxes (address, last_history_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT (address) DO UPDATE SET
                    last_history_id = MAX(last_history_id, excluded.last_history_id),
                    updated_at = excluded.updated_at",
                params![address, history_id as i64, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("advance_cursor: {e}")))?;

        debug!(address, history_id, "Mailbox cursor advanced");
        Ok(())
    }

    async fn set_watch_expiration(
        &self,
        address: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO mailboxes (address, last_history_id, watch_expiration, created_at, updated_at)
                 VALUES (?1, 0, ?2, ?3, ?3)
                 ON CONFLICT (address) DO UPDATE SET
                    watch_expiration = excluded.watch_expiration,
                    updated_at = excluded.updated_at",
                params![address, expires_at.to_rfc3339(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_watch_expiration: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    fn test_message(gmail_id: &str) -> NormalizedMessage {
        NormalizedMessage {
            gmail_id: gmail_id.to_string(),
            thread_id: Some("th-1".to_string()),
            message_id_header: Some(format!("<{gmail_id}@mail.example.com>")),
            sender: "alice@tenant.org".to_string(),
            to: vec!["ops@serniacapital.com".to_string()],
            cc: vec![],
            subject: Some("Leaky faucet".to_string()),
            body: "It drips.".to_string(),
            snippet: Some("It drips.".to_string()),
            label_ids: vec!["INBOX".to_string()],
            internal_date: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_then_get() {
        let db = test_db().await;
        let result = db
            .upsert_message("ops@serniacapital.com", &test_message("gm-1"))
            .await
            .unwrap();
        assert_eq!(result, UpsertResult::Inserted);

        let loaded = db.get_message_by_gmail_id("gm-1").await.unwrap().unwrap();
        assert_eq!(loaded.gmail_id, "gm-1");
        assert_eq!(loaded.mailbox, "ops@serniacapital.com");
        assert_eq!(loaded.sender, "alice@tenant.org");
        assert_eq!(loaded.to, vec!["ops@serniacapital.com"]);
        assert!(loaded.cc.is_empty());
        assert_eq!(loaded.subject.as_deref(), Some("Leaky faucet"));
        assert_eq!(loaded.label_ids, vec!["INBOX"]);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let db = test_db().await;
        let mailbox = "ops@serniacapital.com";

        let first = db.upsert_message(mailbox, &test_message("dup-1")).await.unwrap();
        assert_eq!(first, UpsertResult::Inserted);

        let mut replay = test_message("dup-1");
        replay.label_ids = vec!["INBOX".to_string(), "IMPORTANT".to_string()];
        let second = db.upsert_message(mailbox, &replay).await.unwrap();
        assert_eq!(second, UpsertResult::Updated);

        let all = db.list_messages(Some(mailbox), 10).await.unwrap();
        assert_eq!(all.len(), 1, "exactly one row per gmail_id");
        assert_eq!(all[0].label_ids, vec!["INBOX", "IMPORTANT"]);
    }

    #[tokio::test]
    async fn get_missing_message_is_none() {
        let db = test_db().await;
        assert!(db.get_message_by_gmail_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_messages_filters_and_limits() {
        let db = test_db().await;
        db.upsert_message("a@x.com", &test_message("m1")).await.unwrap();
        db.upsert_message("a@x.com", &test_message("m2")).await.unwrap();
        db.upsert_message("b@x.com", &test_message("m3")).await.unwrap();

        assert_eq!(db.list_messages(Some("a@x.com"), 10).await.unwrap().len(), 2);
        assert_eq!(db.list_messages(Some("b@x.com"), 10).await.unwrap().len(), 1);
        assert_eq!(db.list_messages(None, 10).await.unwrap().len(), 3);
        assert_eq!(db.list_messages(None, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_messages_most_recent_first() {
        let db = test_db().await;
        let mut old = test_message("old");
        old.internal_date = Utc::now() - chrono::Duration::days(2);
        let new = test_message("new");

        db.upsert_message("a@x.com", &old).await.unwrap();
        db.upsert_message("a@x.com", &new).await.unwrap();

        let listed = db.list_messages(None, 10).await.unwrap();
        assert_eq!(listed[0].gmail_id, "new");
        assert_eq!(listed[1].gmail_id, "old");
    }

    #[tokio::test]
    async fn prune_deletes_only_old_messages() {
        let db = test_db().await;
        let mut old = test_message("ancient");
        old.internal_date = Utc::now() - chrono::Duration::days(400);
        db.upsert_message("a@x.com", &old).await.unwrap();
        db.upsert_message("a@x.com", &test_message("fresh")).await.unwrap();

        let pruned = db.prune_messages(365).await.unwrap();
        assert_eq!(pruned, 1);

        let remaining = db.list_messages(None, 10).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].gmail_id, "fresh");
    }

    #[tokio::test]
    async fn prune_zero_days_is_disabled() {
        let db = test_db().await;
        db.upsert_message("a@x.com", &test_message("keep")).await.unwrap();
        assert_eq!(db.prune_messages(0).await.unwrap(), 0);
        assert_eq!(db.list_messages(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn seed_mailbox_is_noop_when_known() {
        let db = test_db().await;
        db.seed_mailbox("a@x.com", 100).await.unwrap();
        db.seed_mailbox("a@x.com", 999).await.unwrap();

        let mailbox = db.get_mailbox("a@x.com").await.unwrap().unwrap();
        assert_eq!(mailbox.last_history_id, 100);
    }

    #[tokio::test]
    async fn advance_cursor_is_monotonic() {
        let db = test_db().await;
        db.seed_mailbox("a@x.com", 100).await.unwrap();

        db.advance_cursor("a@x.com", 150).await.unwrap();
        assert_eq!(
            db.get_mailbox("a@x.com").await.unwrap().unwrap().last_history_id,
            150
        );

        // An older history id never wins.
        db.advance_cursor("a@x.com", 120).await.unwrap();
        assert_eq!(
            db.get_mailbox("a@x.com").await.unwrap().unwrap().last_history_id,
            150
        );
    }

    #[tokio::test]
    async fn watch_expiration_roundtrip() {
        let db = test_db().await;
        db.seed_mailbox("a@x.com", 100).await.unwrap();

        let expires = Utc::now() + chrono::Duration::days(7);
        db.set_watch_expiration("a@x.com", expires).await.unwrap();

        let mailbox = db.get_mailbox("a@x.com").await.unwrap().unwrap();
        let stored = mailbox.watch_expiration.unwrap();
        assert_eq!(stored.timestamp(), expires.timestamp());
        assert_eq!(mailbox.last_history_id, 100);
    }

    #[tokio::test]
    async fn list_mailboxes_sorted() {
        let db = test_db().await;
        db.seed_mailbox("b@x.com", 2).await.unwrap();
        db.seed_mailbox("a@x.com", 1).await.unwrap();

        let mailboxes = db.list_mailboxes().await.unwrap();
        assert_eq!(mailboxes.len(), 2);
        assert_eq!(mailboxes[0].address, "a@x.com");
        assert_eq!(mailboxes[1].address, "b@x.com");
    }

    #[tokio::test]
    async fn new_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("mailroom.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(db);
    }
}

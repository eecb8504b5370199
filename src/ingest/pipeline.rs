//! The ingestion pipeline — resolve the history delta, fetch and normalize
//! new messages, upsert them, advance the mailbox cursor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::IngestConfig;
use crate::error::{Error, GmailError};
use crate::gmail::GmailApi;
use crate::ingest::envelope::MailboxNotification;
use crate::ingest::normalize::{self, is_sender_allowed};
use crate::store::{MailStore, UpsertResult};

/// Result of resolving the history delta for one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// History found with new message ids.
    Success {
        message_ids: Vec<String>,
        latest_history_id: Option<u64>,
    },
    /// History found but nothing new.
    NoMessages { latest_history_id: Option<u64> },
    /// History not yet available after the bounded in-call retry budget.
    RetryNeeded,
}

/// Aggregate outcome of one webhook delivery. Drives the response code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested { new: usize, duplicates: usize },
    NoMessages,
    RetryNeeded,
}

impl IngestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            IngestOutcome::Ingested { .. } => "success",
            IngestOutcome::NoMessages => "no_messages",
            IngestOutcome::RetryNeeded => "retry_needed",
        }
    }
}

/// Stateless pipeline over the Gmail API and the store. Concurrent
/// deliveries coordinate only through the store's uniqueness constraint.
pub struct Ingestor {
    gmail: Arc<dyn GmailApi>,
    store: Arc<dyn MailStore>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(gmail: Arc<dyn GmailApi>, store: Arc<dyn MailStore>, config: IngestConfig) -> Self {
        Self {
            gmail,
            store,
            config,
        }
    }

    /// Process one decoded Pub/Sub notification end to end.
    pub async fn handle_notification(
        &self,
        notification: &MailboxNotification,
    ) -> Result<IngestOutcome, Error> {
        let mailbox = &notification.email_address;

        let Some(state) = self.store.get_mailbox(mailbox).await? else {
            // No cursor yet, so there is nothing to list history from. Seed
            // the cursor so the next notification has a start point.
            self.store
                .seed_mailbox(mailbox, notification.history_id)
                .await?;
            info!(
                mailbox = %mailbox,
                history_id = notification.history_id,
                "First notification for mailbox, cursor seeded"
            );
            return Ok(IngestOutcome::NoMessages);
        };

        match self.resolve_delta(mailbox, state.last_history_id).await? {
            DeltaOutcome::RetryNeeded => Ok(IngestOutcome::RetryNeeded),
            DeltaOutcome::NoMessages { latest_history_id } => {
                self.advance(mailbox, latest_history_id, notification.history_id)
                    .await?;
                Ok(IngestOutcome::NoMessages)
            }
            DeltaOutcome::Success {
                message_ids,
                latest_history_id,
            } => {
                let (new, duplicates) = self.fetch_and_store(mailbox, &message_ids).await?;
                self.advance(mailbox, latest_history_id, notification.history_id)
                    .await?;
                info!(mailbox = %mailbox, new, duplicates, "Notification ingested");
                Ok(IngestOutcome::Ingested { new, duplicates })
            }
        }
    }

    /// Resolve the history delta since `start_history_id`.
    ///
    /// Retries `HistoryNotFound` (the eventual-consistency race) and
    /// transient provider errors with exponential backoff, bounded to the
    /// configured attempt budget. The budget is per-delivery; cross-delivery
    /// retries belong to Pub/Sub.
    pub async fn resolve_delta(
        &self,
        mailbox: &str,
        start_history_id: u64,
    ) -> Result<DeltaOutcome, Error> {
        let attempts = self.config.backoff_attempts.max(1);

        for attempt in 1..=attempts {
            match self.collect_history(mailbox, start_history_id).await {
                Ok((message_ids, latest_history_id)) => {
                    return Ok(if message_ids.is_empty() {
                        DeltaOutcome::NoMessages { latest_history_id }
                    } else {
                        DeltaOutcome::Success {
                            message_ids,
                            latest_history_id,
                        }
                    });
                }
                Err(e) if is_retryable(&e) => {
                    if attempt == attempts {
                        warn!(
                            mailbox,
                            start_history_id,
                            attempts,
                            error = %e,
                            "History still unavailable, deferring to Pub/Sub redelivery"
                        );
                        return Ok(DeltaOutcome::RetryNeeded);
                    }
                    let delay = backoff_delay(
                        self.config.backoff_base,
                        self.config.backoff_max,
                        attempt,
                    );
                    debug!(
                        mailbox,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "History not ready, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(DeltaOutcome::RetryNeeded)
    }

    /// Fetch all history pages and collect new message ids in order.
    async fn collect_history(
        &self,
        mailbox: &str,
        start_history_id: u64,
    ) -> Result<(Vec<String>, Option<u64>), GmailError> {
        let mut message_ids = Vec::new();
        let mut seen = HashSet::new();
        let mut latest_history_id = None;
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .gmail
                .list_history(mailbox, start_history_id, page_token.as_deref())
                .await?;

            latest_history_id = page.history_id.or(latest_history_id);

            for record in &page.history {
                for added in &record.messages_added {
                    if seen.insert(added.message.id.clone()) {
                        message_ids.push(added.message.id.clone());
                    }
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok((message_ids, latest_history_id))
    }

    /// Fetch, normalize, and upsert each message. Returns (new, duplicates).
    async fn fetch_and_store(
        &self,
        mailbox: &str,
        message_ids: &[String],
    ) -> Result<(usize, usize), Error> {
        let mut new = 0;
        let mut duplicates = 0;

        for id in message_ids {
            let raw = match self.gmail.get_message_raw(mailbox, id).await {
                Ok(raw) => raw,
                Err(GmailError::MessageNotFound { .. }) => {
                    debug!(gmail_id = %id, "Message gone before fetch, skipping");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let message = match normalize::normalize_raw(&raw) {
                Ok(message) => message,
                Err(e) => {
                    // A payload that will never parse would wedge the
                    // subscription if treated as fatal.
                    warn!(gmail_id = %id, error = %e, "Skipping unnormalizable message");
                    continue;
                }
            };

            if !is_sender_allowed(&self.config.allowed_senders, &message.sender) {
                debug!(sender = %message.sender, gmail_id = %id, "Sender not allowed, skipping");
                continue;
            }

            match self.store.upsert_message(mailbox, &message).await? {
                UpsertResult::Inserted => new += 1,
                UpsertResult::Updated => duplicates += 1,
            }
        }

        Ok((new, duplicates))
    }

    /// Advance the cursor to the newest historyId observed. The store keeps
    /// this monotonic, so redeliveries of older notifications are harmless.
    async fn advance(
        &self,
        mailbox: &str,
        latest_history_id: Option<u64>,
        envelope_history_id: u64,
    ) -> Result<(), Error> {
        let target = latest_history_id
            .unwrap_or(0)
            .max(envelope_history_id);
        self.store.advance_cursor(mailbox, target).await?;
        Ok(())
    }
}

fn is_retryable(err: &GmailError) -> bool {
    matches!(err, GmailError::HistoryNotFound { .. }) || err.is_transient()
}

/// Exponential backoff with up to +25% jitter, capped at `max`.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(16));
    let jitter = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
    exp.mul_f64(jitter).min(max)
}

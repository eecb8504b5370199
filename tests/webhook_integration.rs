//! Integration tests for the Gmail notification webhook + REST API.
//!
//! Each test spins up the real Axum server on a random port with an
//! in-memory store and a scripted Gmail stub, then exercises the actual
//! HTTP contract with reqwest.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;

use mailroom::config::IngestConfig;
use mailroom::error::GmailError;
use mailroom::gmail::types::{
    HistoryListResponse, HistoryMessageAdded, HistoryRecord, MessageRef, RawMessage, WatchResponse,
};
use mailroom::gmail::GmailApi;
use mailroom::ingest::Ingestor;
use mailroom::server::{build_router, AppState};
use mailroom::store::{LibSqlBackend, MailStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const MAILBOX: &str = "ops@serniacapital.com";

/// Scripted Gmail stub: `list_history` pops the next queued response, and an
/// empty queue behaves like the history-not-available race.
struct StubGmail {
    history: Mutex<Vec<Result<HistoryListResponse, GmailError>>>,
    messages: Mutex<HashMap<String, RawMessage>>,
}

impl StubGmail {
    fn new() -> Self {
        Self {
            history: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
        }
    }

    fn queue_history(&self, response: Result<HistoryListResponse, GmailError>) {
        self.history.lock().unwrap().push(response);
    }

    fn add_message(&self, message: RawMessage) {
        self.messages
            .lock()
            .unwrap()
            .insert(message.id.clone(), message);
    }
}

#[async_trait]
impl GmailApi for StubGmail {
    async fn list_history(
        &self,
        _mailbox: &str,
        start_history_id: u64,
        _page_token: Option<&str>,
    ) -> Result<HistoryListResponse, GmailError> {
        let mut queue = self.history.lock().unwrap();
        if queue.is_empty() {
            Err(GmailError::HistoryNotFound { start_history_id })
        } else {
            queue.remove(0)
        }
    }

    async fn get_message_raw(&self, _mailbox: &str, id: &str) -> Result<RawMessage, GmailError> {
        self.messages
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| GmailError::MessageNotFound { id: id.to_string() })
    }

    async fn watch(
        &self,
        _mailbox: &str,
        _topic: &str,
        _label_ids: &[String],
    ) -> Result<WatchResponse, GmailError> {
        Ok(WatchResponse {
            history_id: 1,
            expiration: None,
        })
    }
}

/// Start the server on a random port. Returns (port, stub, store).
async fn start_server() -> (u16, Arc<StubGmail>, Arc<dyn MailStore>) {
    let store: Arc<dyn MailStore> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let stub = Arc::new(StubGmail::new());

    let config = IngestConfig {
        backoff_attempts: 2,
        backoff_base: Duration::from_millis(1),
        backoff_max: Duration::from_millis(5),
        allowed_senders: vec!["*".to_string()],
    };

    let gmail: Arc<dyn GmailApi> = stub.clone();
    let ingestor = Arc::new(Ingestor::new(gmail, Arc::clone(&store), config));
    let app = build_router(AppState {
        store: Arc::clone(&store),
        ingestor,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (port, stub, store)
}

/// Build a Pub/Sub push envelope body for the given mailbox notification.
fn envelope(mailbox: &str, history_id: u64) -> String {
    let payload = format!(r#"{{"emailAddress": "{mailbox}", "historyId": {history_id}}}"#);
    format!(
        r#"{{"message": {{"data": "{}", "messageId": "pm-1"}}, "subscription": "projects/p/subscriptions/s"}}"#,
        STANDARD.encode(payload)
    )
}

fn history_with(ids: &[&str], history_id: u64) -> HistoryListResponse {
    HistoryListResponse {
        history: vec![HistoryRecord {
            id: Some(history_id),
            messages_added: ids
                .iter()
                .map(|id| HistoryMessageAdded {
                    message: MessageRef {
                        id: id.to_string(),
                        thread_id: None,
                        label_ids: vec![],
                    },
                })
                .collect(),
        }],
        next_page_token: None,
        history_id: Some(history_id),
    }
}

fn raw_message(id: &str, sender: &str, subject: &str) -> RawMessage {
    let rfc822 = format!(
        "Message-ID: <{id}@mail.example.com>\r\nFrom: {sender}\r\nTo: {MAILBOX}\r\nSubject: {subject}\r\n\r\nbody of {id}\r\n"
    );
    RawMessage {
        id: id.to_string(),
        thread_id: Some(format!("thread-{id}")),
        label_ids: vec!["INBOX".to_string()],
        snippet: Some(format!("body of {id}")),
        internal_date: Some(1_700_000_000_000),
        raw: Some(URL_SAFE_NO_PAD.encode(rfc822)),
    }
}

async fn post_notification(port: u16, body: String) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://127.0.0.1:{port}/notifications/gmail"))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap()
}

// ── Webhook contract ─────────────────────────────────────────────────

#[tokio::test]
async fn first_notification_is_acknowledged_and_seeds_cursor() {
    timeout(TEST_TIMEOUT, async {
        let (port, _stub, store) = start_server().await;

        let resp = post_notification(port, envelope(MAILBOX, 100)).await;
        assert_eq!(resp.status(), 204);

        let mailbox = store.get_mailbox(MAILBOX).await.unwrap().unwrap();
        assert_eq!(mailbox.last_history_id, 100);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn new_messages_are_ingested_and_acknowledged() {
    timeout(TEST_TIMEOUT, async {
        let (port, stub, store) = start_server().await;
        store.seed_mailbox(MAILBOX, 100).await.unwrap();

        stub.queue_history(Ok(history_with(&["m1"], 110)));
        stub.add_message(raw_message("m1", "alice@tenant.org", "Leaky faucet in 4B"));

        let resp = post_notification(port, envelope(MAILBOX, 110)).await;
        assert_eq!(resp.status(), 204);

        let stored = store.list_messages(Some(MAILBOX), 10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].gmail_id, "m1");
        assert_eq!(stored[0].subject.as_deref(), Some("Leaky faucet in 4B"));

        let mailbox = store.get_mailbox(MAILBOX).await.unwrap().unwrap();
        assert_eq!(mailbox.last_history_id, 110);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn redelivered_notification_stores_exactly_one_row() {
    timeout(TEST_TIMEOUT, async {
        let (port, stub, store) = start_server().await;
        store.seed_mailbox(MAILBOX, 100).await.unwrap();

        stub.add_message(raw_message("m1", "alice@tenant.org", "Hello"));
        stub.queue_history(Ok(history_with(&["m1"], 110)));
        stub.queue_history(Ok(history_with(&["m1"], 110)));

        let first = post_notification(port, envelope(MAILBOX, 110)).await;
        assert_eq!(first.status(), 204);

        // Pub/Sub redelivers the same notification.
        let second = post_notification(port, envelope(MAILBOX, 110)).await;
        assert_eq!(second.status(), 204);

        let stored = store.list_messages(Some(MAILBOX), 10).await.unwrap();
        assert_eq!(stored.len(), 1, "replay must not create duplicate rows");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn empty_history_is_acknowledged() {
    timeout(TEST_TIMEOUT, async {
        let (port, stub, store) = start_server().await;
        store.seed_mailbox(MAILBOX, 100).await.unwrap();

        stub.queue_history(Ok(HistoryListResponse {
            history: vec![],
            next_page_token: None,
            history_id: Some(105),
        }));

        let resp = post_notification(port, envelope(MAILBOX, 105)).await;
        assert_eq!(resp.status(), 204);
        assert!(store.list_messages(None, 10).await.unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn unavailable_history_requests_redelivery() {
    timeout(TEST_TIMEOUT, async {
        let (port, _stub, store) = start_server().await;
        store.seed_mailbox(MAILBOX, 100).await.unwrap();

        // Stub queue is empty: every attempt sees HistoryNotFound.
        let resp = post_notification(port, envelope(MAILBOX, 110)).await;
        assert_eq!(resp.status(), 503);

        // Cursor must not move on a deferred delivery.
        let mailbox = store.get_mailbox(MAILBOX).await.unwrap().unwrap();
        assert_eq!(mailbox.last_history_id, 100);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn history_race_resolves_on_redelivery() {
    timeout(TEST_TIMEOUT, async {
        let (port, stub, store) = start_server().await;
        store.seed_mailbox(MAILBOX, 100).await.unwrap();

        // First delivery: history not yet available → 503 → Pub/Sub retries.
        let resp = post_notification(port, envelope(MAILBOX, 110)).await;
        assert_eq!(resp.status(), 503);

        // Provider data becomes available before the redelivery.
        stub.queue_history(Ok(history_with(&["m1"], 110)));
        stub.add_message(raw_message("m1", "alice@tenant.org", "Now visible"));

        let resp = post_notification(port, envelope(MAILBOX, 110)).await;
        assert_eq!(resp.status(), 204);

        let stored = store.list_messages(Some(MAILBOX), 10).await.unwrap();
        assert_eq!(stored.len(), 1);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn malformed_envelope_requests_redelivery() {
    timeout(TEST_TIMEOUT, async {
        let (port, _stub, _store) = start_server().await;

        let resp = post_notification(port, "{\"not\": \"an envelope\"}".to_string()).await;
        assert_eq!(resp.status(), 503);
    })
    .await
    .expect("test timed out");
}

// ── REST endpoints ───────────────────────────────────────────────────

#[tokio::test]
async fn rest_health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let (port, _stub, _store) = start_server().await;

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/healthz"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "mailroom");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_list_messages_filters_by_mailbox() {
    timeout(TEST_TIMEOUT, async {
        let (port, stub, store) = start_server().await;
        store.seed_mailbox(MAILBOX, 100).await.unwrap();

        stub.queue_history(Ok(history_with(&["m1", "m2"], 110)));
        stub.add_message(raw_message("m1", "alice@tenant.org", "One"));
        stub.add_message(raw_message("m2", "bob@tenant.org", "Two"));

        let resp = post_notification(port, envelope(MAILBOX, 110)).await;
        assert_eq!(resp.status(), 204);

        let resp = reqwest::get(format!(
            "http://127.0.0.1:{port}/api/messages?mailbox={MAILBOX}&limit=10"
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Vec<Value> = resp.json().await.unwrap();
        assert_eq!(body.len(), 2);

        let resp = reqwest::get(format!(
            "http://127.0.0.1:{port}/api/messages?mailbox=other@example.com"
        ))
        .await
        .unwrap();
        let body: Vec<Value> = resp.json().await.unwrap();
        assert!(body.is_empty());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rest_list_mailboxes() {
    timeout(TEST_TIMEOUT, async {
        let (port, _stub, store) = start_server().await;
        store.seed_mailbox(MAILBOX, 321).await.unwrap();

        let resp = reqwest::get(format!("http://127.0.0.1:{port}/api/mailboxes"))
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);

        let body: Vec<Value> = resp.json().await.unwrap();
        assert_eq!(body.len(), 1);
        assert_eq!(body[0]["address"], MAILBOX);
        assert_eq!(body[0]["last_history_id"], 321);
    })
    .await
    .expect("test timed out");
}

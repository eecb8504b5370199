//! Gmail REST client — history deltas, raw message fetch, watch registration.
//!
//! `GmailApi` is the seam the ingestion pipeline is written against; tests
//! substitute a scripted stub, production uses `GmailHttpClient`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::GmailError;
use crate::gmail::auth::TokenProvider;
use crate::gmail::types::{HistoryListResponse, RawMessage, WatchResponse};

/// The subset of the Gmail API the pipeline needs.
#[async_trait]
pub trait GmailApi: Send + Sync {
    /// `users.history.list`: one page of changes since `start_history_id`.
    async fn list_history(
        &self,
        mailbox: &str,
        start_history_id: u64,
        page_token: Option<&str>,
    ) -> Result<HistoryListResponse, GmailError>;

    /// `users.messages.get?format=raw`: full message content.
    async fn get_message_raw(&self, mailbox: &str, id: &str) -> Result<RawMessage, GmailError>;

    /// `users.watch`: (re-)register the Pub/Sub watch for a mailbox.
    async fn watch(
        &self,
        mailbox: &str,
        topic: &str,
        label_ids: &[String],
    ) -> Result<WatchResponse, GmailError>;
}

/// HTTP implementation against the real (or a stubbed) Gmail endpoint.
pub struct GmailHttpClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenProvider>,
}

impl GmailHttpClient {
    pub fn new(base_url: &str, tokens: Arc<TokenProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    async fn send_get(
        &self,
        endpoint: &'static str,
        url: &str,
    ) -> Result<reqwest::Response, GmailError> {
        let token = self.tokens.access_token().await?;
        self.http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GmailError::RequestFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> Result<T, GmailError> {
        response.json().await.map_err(|e| GmailError::InvalidResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    async fn status_error(
        endpoint: &'static str,
        response: reqwest::Response,
    ) -> GmailError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        GmailError::Status {
            endpoint: endpoint.to_string(),
            status,
            body: truncate(&body, 200),
        }
    }
}

#[async_trait]
impl GmailApi for GmailHttpClient {
    async fn list_history(
        &self,
        mailbox: &str,
        start_history_id: u64,
        page_token: Option<&str>,
    ) -> Result<HistoryListResponse, GmailError> {
        let url = history_url(&self.base_url, mailbox, start_history_id, page_token);
        let response = self.send_get("history.list", &url).await?;

        match response.status() {
            s if s.is_success() => Self::read_json("history.list", response).await,
            StatusCode::NOT_FOUND => Err(GmailError::HistoryNotFound { start_history_id }),
            _ => Err(Self::status_error("history.list", response).await),
        }
    }

    async fn get_message_raw(&self, mailbox: &str, id: &str) -> Result<RawMessage, GmailError> {
        let url = format!(
            "{}/users/{}/messages/{}?format=raw",
            self.base_url, mailbox, id
        );
        let response = self.send_get("messages.get", &url).await?;

        match response.status() {
            s if s.is_success() => Self::read_json("messages.get", response).await,
            StatusCode::NOT_FOUND => Err(GmailError::MessageNotFound { id: id.to_string() }),
            _ => Err(Self::status_error("messages.get", response).await),
        }
    }

    async fn watch(
        &self,
        mailbox: &str,
        topic: &str,
        label_ids: &[String],
    ) -> Result<WatchResponse, GmailError> {
        let url = format!("{}/users/{}/watch", self.base_url, mailbox);
        let mut body = serde_json::json!({ "topicName": topic });
        if !label_ids.is_empty() {
            body["labelIds"] = serde_json::json!(label_ids);
        }

        let token = self.tokens.access_token().await?;
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| GmailError::RequestFailed {
                endpoint: "watch".to_string(),
                reason: e.to_string(),
            })?;

        if response.status().is_success() {
            Self::read_json("watch", response).await
        } else {
            Err(Self::status_error("watch", response).await)
        }
    }
}

fn history_url(
    base_url: &str,
    mailbox: &str,
    start_history_id: u64,
    page_token: Option<&str>,
) -> String {
    let mut url = format!(
        "{base_url}/users/{mailbox}/history?startHistoryId={start_history_id}&historyTypes=messageAdded"
    );
    if let Some(token) = page_token {
        url.push_str("&pageToken=");
        url.push_str(token);
    }
    url
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

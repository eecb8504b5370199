//! HTTP surface — router assembly and the read-only REST endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::ingest::Ingestor;
use crate::server::notifications;
use crate::store::MailStore;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MailStore>,
    pub ingestor: Arc<Ingestor>,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route(
            "/notifications/gmail",
            post(notifications::handle_gmail_notification),
        )
        .route("/api/messages", get(list_messages))
        .route("/api/mailboxes", get(list_mailboxes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "mailroom" }))
}

#[derive(Debug, Deserialize)]
struct ListMessagesQuery {
    mailbox: Option<String>,
    limit: Option<usize>,
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<ListMessagesQuery>,
) -> impl IntoResponse {
    let limit = clamp_limit(query.limit);
    match state.store.list_messages(query.mailbox.as_deref(), limit).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list messages");
            internal_error()
        }
    }
}

async fn list_mailboxes(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.list_mailboxes().await {
        Ok(mailboxes) => Json(mailboxes).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to list mailboxes");
            internal_error()
        }
    }
}

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

fn internal_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "internal error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(clamp_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_LIST_LIMIT);
    }
}

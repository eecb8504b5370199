//! The Pub/Sub push webhook — decode, ingest, answer with a retry signal.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::{error, info, warn};

use crate::ingest::decode_envelope;
use crate::ingest::pipeline::IngestOutcome;
use crate::server::routes::AppState;

/// `POST /notifications/gmail`
///
/// The response code is the whole contract: 204 acknowledges the delivery,
/// anything else (we use 503) makes Pub/Sub redeliver later.
pub async fn handle_gmail_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> StatusCode {
    let notification = match decode_envelope(&body) {
        Ok(notification) => notification,
        Err(e) => {
            warn!(error = %e, "Undecodable push envelope");
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    };

    match state.ingestor.handle_notification(&notification).await {
        Ok(outcome) => {
            info!(
                mailbox = %notification.email_address,
                history_id = notification.history_id,
                outcome = outcome.label(),
                "Notification handled"
            );
            outcome_status(&outcome)
        }
        Err(e) => {
            error!(
                mailbox = %notification.email_address,
                history_id = notification.history_id,
                error = %e,
                "Notification processing failed"
            );
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Map a pipeline outcome to the Pub/Sub retry contract.
pub fn outcome_status(outcome: &IngestOutcome) -> StatusCode {
    match outcome {
        IngestOutcome::Ingested { .. } | IngestOutcome::NoMessages => StatusCode::NO_CONTENT,
        IngestOutcome::RetryNeeded => StatusCode::SERVICE_UNAVAILABLE,
    }
}

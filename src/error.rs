//! Error types for mailroom.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Gmail error: {0}")]
    Gmail(#[from] GmailError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors talking to the Gmail REST API.
#[derive(Debug, thiserror::Error)]
pub enum GmailError {
    #[error("Token refresh failed: {reason}")]
    Auth { reason: String },

    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("History not available for startHistoryId {start_history_id}")]
    HistoryNotFound { start_history_id: u64 },

    #[error("Message {id} not found")]
    MessageNotFound { id: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GmailError {
    /// Whether this error is a transient provider condition worth another
    /// attempt within the same call (timeouts, connection errors, 429/5xx).
    ///
    /// `HistoryNotFound` is handled separately by the delta-resolution loop:
    /// it is the eventual-consistency race, not a request failure.
    pub fn is_transient(&self) -> bool {
        match self {
            GmailError::RequestFailed { .. } => true,
            GmailError::Status { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

/// Errors in the notification-ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Invalid push envelope: {0}")]
    Envelope(String),

    #[error("Failed to normalize message {gmail_id}: {reason}")]
    Normalize { gmail_id: String, reason: String },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            let err = GmailError::Status {
                endpoint: "history.list".into(),
                status,
                body: String::new(),
            };
            assert!(err.is_transient(), "HTTP {status} should be transient");
        }
    }

    #[test]
    fn permanent_statuses() {
        for status in [400, 401, 403, 404] {
            let err = GmailError::Status {
                endpoint: "history.list".into(),
                status,
                body: String::new(),
            };
            assert!(!err.is_transient(), "HTTP {status} should be permanent");
        }
    }

    #[test]
    fn connection_errors_are_transient() {
        let err = GmailError::RequestFailed {
            endpoint: "messages.get".into(),
            reason: "connection reset".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn history_not_found_is_not_transient() {
        // The race is resolved by the delta loop, not the transport retry check.
        let err = GmailError::HistoryNotFound {
            start_history_id: 42,
        };
        assert!(!err.is_transient());
    }
}

//! Configuration types, built from environment variables.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("MAILROOM_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        Self { bind_addr }
    }
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the local database file.
    pub path: String,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        let path = std::env::var("MAILROOM_DB_PATH")
            .unwrap_or_else(|_| "./data/mailroom.db".to_string());
        Self { path }
    }
}

/// Gmail API credentials and endpoints.
///
/// Either `GMAIL_ACCESS_TOKEN` (a pre-issued token, useful in development) or
/// the refresh-token triple (`GMAIL_CLIENT_ID`, `GMAIL_CLIENT_SECRET`,
/// `GMAIL_REFRESH_TOKEN`) must be set.
#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub base_url: String,
    pub token_url: String,
    pub access_token: Option<SecretString>,
    pub client_id: String,
    pub client_secret: SecretString,
    pub refresh_token: SecretString,
}

impl GmailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = std::env::var("GMAIL_API_BASE_URL")
            .unwrap_or_else(|_| "https://gmail.googleapis.com/gmail/v1".to_string());
        let token_url = std::env::var("GMAIL_TOKEN_URL")
            .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string());

        let access_token = std::env::var("GMAIL_ACCESS_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);

        let client_id = std::env::var("GMAIL_CLIENT_ID").unwrap_or_default();
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET").unwrap_or_default();
        let refresh_token = std::env::var("GMAIL_REFRESH_TOKEN").unwrap_or_default();

        if access_token.is_none()
            && (client_id.is_empty() || client_secret.is_empty() || refresh_token.is_empty())
        {
            return Err(ConfigError::MissingRequired {
                key: "GMAIL_CLIENT_ID / GMAIL_CLIENT_SECRET / GMAIL_REFRESH_TOKEN".to_string(),
                hint: "Set the OAuth refresh-token triple, or GMAIL_ACCESS_TOKEN for a \
                       pre-issued token."
                    .to_string(),
            });
        }

        Ok(Self {
            base_url,
            token_url,
            access_token,
            client_id,
            client_secret: SecretString::from(client_secret),
            refresh_token: SecretString::from(refresh_token),
        })
    }
}

/// Ingestion tuning: the in-call backoff budget for delta resolution and the
/// optional sender allowlist applied before persistence.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Bounded attempts against the provider within a single webhook delivery.
    pub backoff_attempts: u32,
    /// Base delay for the first retry; doubles per attempt.
    pub backoff_base: Duration,
    /// Cap on any single backoff delay.
    pub backoff_max: Duration,
    /// Sender allowlist (`*` allows everyone). Entries: exact address,
    /// `@domain`, or bare domain.
    pub allowed_senders: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            backoff_attempts: 4,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(8),
            allowed_senders: vec!["*".to_string()],
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let backoff_attempts = env_parse("MAILROOM_HISTORY_BACKOFF_ATTEMPTS")
            .unwrap_or(defaults.backoff_attempts);
        let backoff_base = env_parse("MAILROOM_HISTORY_BACKOFF_BASE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_base);
        let backoff_max = env_parse("MAILROOM_HISTORY_BACKOFF_MAX_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.backoff_max);

        let allowed_senders = match std::env::var("MAILROOM_ALLOWED_SENDERS") {
            Ok(raw) => parse_list(&raw),
            Err(_) => defaults.allowed_senders,
        };

        Self {
            backoff_attempts,
            backoff_base,
            backoff_max,
            allowed_senders,
        }
    }
}

/// Gmail watch renewal configuration. The watch job is enabled only when
/// `GMAIL_PUBSUB_TOPIC` is set.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Mailbox address the watch is registered for.
    pub mailbox: String,
    /// Fully-qualified Pub/Sub topic, e.g. `projects/p/topics/gmail-changes`.
    pub topic: String,
    /// Label ids to restrict the watch to.
    pub label_ids: Vec<String>,
    /// Cron expression for renewal (watches expire after ~7 days).
    pub schedule: String,
}

impl WatchConfig {
    /// Returns `None` if `GMAIL_PUBSUB_TOPIC` is not set (job disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let Ok(topic) = std::env::var("GMAIL_PUBSUB_TOPIC") else {
            return Ok(None);
        };

        let mailbox = std::env::var("GMAIL_WATCH_MAILBOX")
            .map_err(|_| ConfigError::MissingRequired {
                key: "GMAIL_WATCH_MAILBOX".to_string(),
                hint: "Required when GMAIL_PUBSUB_TOPIC is set.".to_string(),
            })?;

        let label_ids = std::env::var("GMAIL_WATCH_LABELS")
            .map(|raw| parse_list(&raw))
            .unwrap_or_else(|_| vec!["INBOX".to_string()]);

        // Every day at 03:17 UTC by default; cron crate expressions include seconds.
        let schedule = std::env::var("GMAIL_WATCH_SCHEDULE")
            .unwrap_or_else(|_| "0 17 3 * * * *".to_string());
        cron::Schedule::from_str(&schedule).map_err(|e| ConfigError::InvalidValue {
            key: "GMAIL_WATCH_SCHEDULE".to_string(),
            message: format!("invalid cron expression: {e}"),
        })?;

        Ok(Some(Self {
            mailbox,
            topic,
            label_ids,
            schedule,
        }))
    }
}

/// Message retention.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Delete stored messages older than this many days. 0 disables the sweep.
    pub keep_days: u32,
    /// Interval between sweeps.
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_days: 365,
            sweep_interval: Duration::from_secs(24 * 3600),
        }
    }
}

impl RetentionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let keep_days = env_parse("MAILROOM_RETENTION_DAYS").unwrap_or(defaults.keep_days);
        let sweep_interval = env_parse("MAILROOM_RETENTION_SWEEP_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);
        Self {
            keep_days,
            sweep_interval,
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gmail: GmailConfig,
    pub ingest: IngestConfig,
    pub watch: Option<WatchConfig>,
    pub retention: RetentionConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env(),
            database: DatabaseConfig::from_env(),
            gmail: GmailConfig::from_env()?,
            ingest: IngestConfig::from_env(),
            watch: WatchConfig::from_env()?,
            retention: RetentionConfig::from_env(),
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Parse an env var, falling back to `None` when unset or unparseable.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Split a comma-separated env value into trimmed, non-empty entries.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

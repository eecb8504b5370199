//! Access-token plumbing for outbound Gmail calls.
//!
//! Tokens come from the OAuth 2.0 refresh-token grant and are cached until
//! shortly before expiry. A pre-issued token (`GMAIL_ACCESS_TOKEN`) bypasses
//! the refresh path entirely; interactive consent flows are out of scope.

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::config::GmailConfig;
use crate::error::GmailError;
use crate::gmail::types::TokenResponse;

/// Refresh this long before the token actually expires.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

enum TokenSource {
    /// A fixed token, never refreshed.
    Fixed(SecretString),
    /// Refresh-token grant against the OAuth token endpoint.
    Refresh {
        token_url: String,
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
    },
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Provides Bearer tokens for the Gmail client, refreshing on demand.
pub struct TokenProvider {
    http: reqwest::Client,
    source: TokenSource,
    cached: RwLock<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn from_config(config: &GmailConfig) -> Self {
        let source = match &config.access_token {
            Some(token) => TokenSource::Fixed(token.clone()),
            None => TokenSource::Refresh {
                token_url: config.token_url.clone(),
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                refresh_token: config.refresh_token.clone(),
            },
        };
        Self {
            http: reqwest::Client::new(),
            source,
            cached: RwLock::new(None),
        }
    }

    /// A provider that always returns the given token (tests, development).
    pub fn fixed(token: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            source: TokenSource::Fixed(SecretString::from(token.to_string())),
            cached: RwLock::new(None),
        }
    }

    /// Get a valid access token, refreshing if the cached one is stale.
    pub async fn access_token(&self) -> Result<String, GmailError> {
        let (token_url, client_id, client_secret, refresh_token) = match &self.source {
            TokenSource::Fixed(token) => return Ok(token.expose_secret().to_string()),
            TokenSource::Refresh {
                token_url,
                client_id,
                client_secret,
                refresh_token,
            } => (token_url, client_id, client_secret, refresh_token),
        };

        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.token.expose_secret().to_string());
            }
        }

        let mut guard = self.cached.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if let Some(cached) = guard.as_ref() {
            if cached.is_fresh() {
                return Ok(cached.token.expose_secret().to_string());
            }
        }

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.expose_secret()),
            ("refresh_token", refresh_token.expose_secret()),
        ];

        let response = self
            .http
            .post(token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| GmailError::Auth {
                reason: format!("token endpoint unreachable: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GmailError::Auth {
                reason: format!("token endpoint returned HTTP {}: {body}", status.as_u16()),
            });
        }

        let token: TokenResponse = response.json().await.map_err(|e| GmailError::Auth {
            reason: format!("invalid token response: {e}"),
        })?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_SLACK);
        let access_token = SecretString::from(token.access_token);
        let result = access_token.expose_secret().to_string();
        *guard = Some(CachedToken {
            token: access_token,
            expires_at: Instant::now() + lifetime,
        });

        tracing::debug!(expires_in = token.expires_in, "Access token refreshed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_token_is_returned_verbatim() {
        let provider = TokenProvider::fixed("ya29.test-token");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.test-token");
    }

    #[test]
    fn cached_token_freshness() {
        let fresh = CachedToken {
            token: SecretString::from("t".to_string()),
            expires_at: Instant::now() + Duration::from_secs(60),
        };
        assert!(fresh.is_fresh());

        let stale = CachedToken {
            token: SecretString::from("t".to_string()),
            expires_at: Instant::now() - Duration::from_secs(1),
        };
        assert!(!stale.is_fresh());
    }
}

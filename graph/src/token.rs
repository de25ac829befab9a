//! Credential / token provider (C1): OAuth2 client-credentials access tokens.

use std::time::{Duration, Instant};

use mailgw_core::AuthConfig;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::TokenError;

/// A token is only usable while more than this much time remains before expiry.
const SAFETY_BUFFER: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct CachedToken {
    bearer: String,
    expiry: Instant,
}

impl CachedToken {
    fn is_usable(&self) -> bool {
        Instant::now() + SAFETY_BUFFER < self.expiry
    }
}

/// Production Microsoft identity platform authority.
pub const TOKEN_BASE: &str = "https://login.microsoftonline.com";

/// Maintains at most one cached access token and coalesces concurrent
/// refreshes into a single request per sender instance (§4.1).
pub struct TokenProvider {
    http: reqwest::Client,
    config: AuthConfig,
    token_base: String,
    cached: tokio::sync::Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    pub fn new(http: reqwest::Client, config: AuthConfig) -> Self {
        Self::with_token_base(http, config, TOKEN_BASE)
    }

    /// Like [`Self::new`], but pointed at an alternate token authority —
    /// used by tests to target a mock server instead of the real Microsoft
    /// identity platform.
    pub fn with_token_base(http: reqwest::Client, config: AuthConfig, token_base: impl Into<String>) -> Self {
        Self {
            http,
            config,
            token_base: token_base.into(),
            cached: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns a bearer token whose expiry is more than [`SAFETY_BUFFER`] in
    /// the future, refreshing it first if necessary.
    ///
    /// Holding the cache mutex across the refresh is what gives "at most one
    /// refresh in flight": concurrent callers queue on the lock, and every
    /// caller besides the one that performs the refresh observes the freshly
    /// cached token without making its own request.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, cancel)))]
    pub async fn get_token(&self, cancel: &CancellationToken) -> Result<String, TokenError> {
        let mut guard = self.cached.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.is_usable() {
                return Ok(token.bearer.clone());
            }
        }

        if cancel.is_cancelled() {
            return Err(TokenError::Cancelled);
        }

        let fresh = Self::fetch_token(&self.http, &self.config, &self.token_base).await?;
        *guard = Some(fresh.clone());
        Ok(fresh.bearer)
    }

    async fn fetch_token(http: &reqwest::Client, config: &AuthConfig, token_base: &str) -> Result<CachedToken, TokenError> {
        let token_url = format!("{token_base}/{}/oauth2/v2.0/token", config.tenant_id);

        let form_data = [
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.expose_secret()),
            ("grant_type", "client_credentials"),
            ("scope", "https://graph.microsoft.com/.default"),
        ];

        let response = http
            .post(&token_url)
            .form(&form_data)
            .send()
            .await
            .map_err(TokenError::SendRequest)?;

        let status = response.status();
        let body = response.bytes().await.map_err(TokenError::ReceiveResponse)?;

        if !status.is_success() {
            return Err(TokenError::ErrorResponse {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: TokenResponse = serde_json::from_slice(&body).map_err(TokenError::ParseResponse)?;

        Ok(CachedToken {
            bearer: parsed.access_token,
            expiry: Instant::now() + Duration::from_secs(parsed.expires_in),
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_token_respects_safety_buffer() {
        let almost_expired = CachedToken {
            bearer: "x".to_string(),
            expiry: Instant::now() + Duration::from_secs(10),
        };
        assert!(!almost_expired.is_usable());

        let fresh = CachedToken {
            bearer: "x".to_string(),
            expiry: Instant::now() + Duration::from_secs(300),
        };
        assert!(fresh.is_usable());
    }
}

//! OAuth refresh-token grant with an in-memory and on-disk token cache.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use deskpull_core::error::AppError;
use deskpull_core::traits::TokenProvider;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use url::form_urlencoded;

use crate::transport::send_error;

pub const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.zoho.com";

/// A token is refreshed once less than this much validity remains.
const REFRESH_MARGIN_MS: i64 = 5 * 60 * 1000;

/// Lifetime assumed when the grant does not state one.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Long-lived client credentials used to mint access tokens.
#[derive(Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Access token as stored in the cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub access_token: String,
    /// Expiry as Unix epoch milliseconds.
    pub expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now_ms: i64) -> bool {
        !self.access_token.is_empty() && self.expires_at > now_ms + REFRESH_MARGIN_MS
    }
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: Option<String>,
    expires_in_sec: Option<i64>,
    expires_in: Option<i64>,
    error: Option<String>,
}

/// Token provider backed by the refresh-token grant.
///
/// Clones share one cache; concurrent callers wait on a single refresh.
#[derive(Clone)]
pub struct OAuthTokenProvider {
    client: Client,
    token_url: String,
    credentials: Arc<OAuthCredentials>,
    cache_file: Option<PathBuf>,
    current: Arc<Mutex<Option<CachedToken>>>,
    timeout_secs: u64,
}

impl OAuthTokenProvider {
    pub fn new(credentials: OAuthCredentials, accounts_url: &str) -> Result<Self, AppError> {
        let timeout = Duration::from_secs(30);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            token_url: format!("{}/oauth/v2/token", accounts_url.trim_end_matches('/')),
            credentials: Arc::new(credentials),
            cache_file: None,
            current: Arc::new(Mutex::new(None)),
            timeout_secs: timeout.as_secs(),
        })
    }

    /// Persist tokens to `path` and reuse them across runs.
    pub fn with_cache_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_file = Some(path.into());
        self
    }

    async fn refresh(&self) -> Result<CachedToken, AppError> {
        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("refresh_token", &self.credentials.refresh_token)
            .append_pair("client_id", &self.credentials.client_id)
            .append_pair("client_secret", &self.credentials.client_secret)
            .append_pair("grant_type", "refresh_token")
            .finish();

        let response = self
            .client
            .post(&self.token_url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout_secs))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::AuthError(format!("Failed to read token response: {e}")))?;

        if !status.is_success() {
            return Err(AppError::AuthError(format!(
                "Token refresh failed: HTTP {} - {}",
                status.as_u16(),
                body
            )));
        }

        let grant: TokenGrant = serde_json::from_str(&body)
            .map_err(|e| AppError::AuthError(format!("Unreadable token response: {e}")))?;
        if let Some(error) = grant.error {
            return Err(AppError::AuthError(format!("Token refresh rejected: {error}")));
        }
        let access_token = grant
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::AuthError("No access_token in token response".into()))?;
        let expires_in = grant
            .expires_in_sec
            .or(grant.expires_in)
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        Ok(CachedToken {
            access_token,
            expires_at: now_ms() + expires_in * 1000,
        })
    }

    fn load_cache(&self) -> Option<CachedToken> {
        let path = self.cache_file.as_deref()?;
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Ignoring unreadable token cache");
                None
            }
        }
    }

    fn store_cache(&self, token: &CachedToken) {
        let Some(path) = self.cache_file.as_deref() else {
            return;
        };
        if let Err(e) = write_cache(path, token) {
            tracing::warn!(path = %path.display(), error = %e, "Could not save token cache");
        }
    }
}

fn write_cache(path: &Path, token: &CachedToken) -> Result<(), AppError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(token)?)?;
    Ok(())
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl TokenProvider for OAuthTokenProvider {
    async fn access_token(&self) -> Result<String, AppError> {
        let mut current = self.current.lock().await;
        let now = now_ms();

        if let Some(token) = current.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.access_token.clone());
        }
        if current.is_none()
            && let Some(cached) = self.load_cache().filter(|t| t.is_fresh(now))
        {
            let token = cached.access_token.clone();
            *current = Some(cached);
            return Ok(token);
        }

        let fresh = self.refresh().await?;
        tracing::info!(expires_at = fresh.expires_at, "Access token refreshed");
        self.store_cache(&fresh);
        let token = fresh.access_token.clone();
        *current = Some(fresh);
        Ok(token)
    }
}

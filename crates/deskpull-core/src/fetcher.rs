use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;

use crate::error::AppError;
use crate::rate_limit::RateLimiter;
use crate::traits::{ResponseMeta, TokenProvider, Transport};

/// Retries after the first attempt before a call is given up.
pub const MAX_RETRIES: u32 = 3;

/// Backoff policy for 429/5xx and transient transport failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay of the first retry; doubled on every further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff for a 0-indexed attempt: 1s, 2s, 4s, ...
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Authenticated, paced, retrying GET client for the desk API.
///
/// Clones share the rate limiter and the call counter, so one instance per
/// run accounts for every call made by listing and enrichment alike.
#[derive(Clone)]
pub struct DeskFetcher<T, P> {
    transport: T,
    tokens: P,
    base_url: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
    calls: Arc<AtomicU64>,
}

impl<T: Transport, P: TokenProvider> DeskFetcher<T, P> {
    pub fn new(transport: T, tokens: P, base_url: &str, limiter: RateLimiter) -> Self {
        Self {
            transport,
            tokens,
            base_url: base_url.trim_end_matches('/').to_string(),
            limiter,
            retry: RetryPolicy::default(),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Number of `get_json` calls issued so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// GET `endpoint` (relative to the base URL) and parse the JSON body.
    ///
    /// An empty success body (the API answers 204 for empty lists) is
    /// returned as `Value::Null`.
    pub async fn get_json(&self, endpoint: &str) -> Result<Value, AppError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let url = format!("{}{}", self.base_url, endpoint);
        let attempts = self.retry.max_retries + 1;

        for attempt in 0..attempts {
            let last = attempt + 1 == attempts;
            let token = self.tokens.access_token().await?;
            self.limiter.await_clearance(&ResponseMeta::default()).await;

            let response = match self.transport.get(&url, &token).await {
                Ok(response) => response,
                Err(e) if e.is_retryable() && !last => {
                    let backoff = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        %endpoint,
                        error = %e,
                        backoff_ms = %backoff.as_millis(),
                        attempt = attempt + 1,
                        max = self.retry.max_retries,
                        "Transport failure, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let meta = response.meta();
            self.limiter.observe(&meta);

            let status = response.status;
            if status == 429 || (500..600).contains(&status) {
                if last {
                    return Err(AppError::RetriesExhausted {
                        endpoint: endpoint.to_string(),
                        status,
                        attempts,
                    });
                }
                let wait = match meta.retry_after {
                    Some(wait) if status == 429 => wait,
                    _ => self.retry.delay_for_attempt(attempt),
                };
                tracing::warn!(
                    %endpoint,
                    status,
                    wait_ms = %wait.as_millis(),
                    attempt = attempt + 1,
                    max = self.retry.max_retries,
                    "Retryable status, waiting"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !response.is_success() {
                return Err(AppError::Api {
                    endpoint: endpoint.to_string(),
                    status,
                    body: response.body,
                });
            }

            if response.body.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&response.body)?);
        }

        Err(AppError::Generic(format!("no attempt was made for {endpoint}")))
    }
}

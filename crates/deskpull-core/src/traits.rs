use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::models::Ticket;

/// Header carrying the remaining API credits for the current window.
pub const REMAINING_CREDITS_HEADER: &str = "x-rate-limit-remaining-v3";

/// Header carrying a server-mandated wait, in seconds.
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// A raw API response as seen by the fetcher.
///
/// Header names are stored lower-cased.
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Pacing signals carried by this response.
    pub fn meta(&self) -> ResponseMeta {
        ResponseMeta {
            remaining_credits: self
                .header(REMAINING_CREDITS_HEADER)
                .and_then(|v| v.trim().parse().ok()),
            retry_after: self
                .header(RETRY_AFTER_HEADER)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }
    }
}

/// Call-budget signals extracted from a response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub remaining_credits: Option<i64>,
    pub retry_after: Option<Duration>,
}

/// Issues a single authenticated GET against the remote API.
pub trait Transport: Send + Sync + Clone + 'static {
    fn get(
        &self,
        url: &str,
        access_token: &str,
    ) -> impl Future<Output = Result<ApiResponse, AppError>> + Send;
}

/// Supplies a valid access token, refreshing it when needed.
pub trait TokenProvider: Send + Sync + Clone + 'static {
    fn access_token(&self) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Persists one finished ticket. Returns where it was written.
pub trait TicketSink: Send + Sync {
    fn write(&self, ticket: &Ticket) -> Result<PathBuf, AppError>;
}

/// Token provider handing out a fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, AppError> {
        Ok(self.0.clone())
    }
}

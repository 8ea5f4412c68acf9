use std::time::Duration;

use deskpull_core::error::AppError;
use deskpull_core::traits::{ApiResponse, Transport};
use reqwest::Client;

/// HTTP transport for the desk API using reqwest.
///
/// Sends the OAuth token and organization id on every request and hands
/// back status, headers and body untouched; status handling is left to
/// the fetcher.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    org_id: String,
    timeout_secs: u64,
}

impl ReqwestTransport {
    pub fn new(org_id: &str) -> Result<Self, AppError> {
        Self::with_timeout(org_id, Duration::from_secs(30))
    }

    pub fn with_timeout(org_id: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("deskpull/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::HttpError(e.to_string()))?;

        Ok(Self {
            client,
            org_id: org_id.to_string(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, access_token: &str) -> Result<ApiResponse, AppError> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Zoho-oauthtoken {access_token}"))
            .header("orgId", &self.org_id)
            .send()
            .await
            .map_err(|e| send_error(e, self.timeout_secs))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::HttpError(format!("Failed to read response body: {e}")))?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a failed send to the error the fetcher's retry logic understands.
pub(crate) fn send_error(e: reqwest::Error, timeout_secs: u64) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(timeout_secs)
    } else if e.is_connect() {
        AppError::NetworkError(format!("Connection failed: {e}"))
    } else {
        AppError::HttpError(e.to_string())
    }
}

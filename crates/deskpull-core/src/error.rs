use thiserror::Error;

/// Application-wide error types for deskpull.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or invalid credentials/configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Access token could not be obtained or refreshed.
    #[error("Authentication error: {0}")]
    AuthError(String),

    /// HTTP request could not be built or its body could not be read.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The API answered with a non-success status that is not retried.
    #[error("API GET {endpoint} failed: HTTP {status} - {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// A retryable status kept coming back until the retry ceiling.
    #[error("API GET {endpoint} still failing after {attempts} attempts (last status {status})")]
    RetriesExhausted {
        endpoint: String,
        status: u16,
        attempts: u32,
    },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// A pool task ended without producing a result (panicked or dropped).
    #[error("Pool task aborted: {0}")]
    PoolError(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }
}

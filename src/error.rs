//! Fredgate error types

use std::time::Duration;

/// Fredgate error types
#[derive(Debug, thiserror::Error)]
pub enum FredError {
    // Transport errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("request timed out")]
    Timeout,

    // Upstream errors
    /// Non-retryable upstream failure: a 4xx other than 429, or an
    /// `error_code` embedded in an otherwise successful payload.
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    // Data errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Local errors
    #[error("cache error: {0}")]
    Cache(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl FredError {
    /// Whether a retry of the same request may succeed.
    ///
    /// Transport failures, timeouts, 5xx and 429 are transient. Everything
    /// else (bad parameters, auth, embedded error codes) is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FredError::Http(_)
                | FredError::Timeout
                | FredError::RateLimited { .. }
                | FredError::Server { .. }
        )
    }

    /// Server-provided throttling hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FredError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Upstream HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FredError::Api { status, .. } | FredError::Server { status, .. } => Some(*status),
            FredError::RateLimited { .. } => Some(429),
            _ => None,
        }
    }

    /// Short label used for metrics and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            FredError::Http(_) => "http",
            FredError::Timeout => "timeout",
            FredError::Api { .. } => "api",
            FredError::RateLimited { .. } => "rate_limited",
            FredError::Server { .. } => "server",
            FredError::InvalidPayload(_) => "invalid_payload",
            FredError::Json(_) => "json",
            FredError::InvalidInput(_) => "invalid_input",
            FredError::Cache(_) => "cache",
            FredError::Configuration(_) => "configuration",
        }
    }
}

impl From<reqwest::Error> for FredError {
    fn from(err: reqwest::Error) -> Self {
        // The request URL carries the API key in its query string.
        let err = err.without_url();
        if err.is_timeout() {
            FredError::Timeout
        } else {
            FredError::Http(err.to_string())
        }
    }
}

/// Result type alias for Fredgate operations
pub type Result<T> = std::result::Result<T, FredError>;

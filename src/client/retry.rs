//! Retry configuration and attempt classification.
//!
//! Every network attempt is reduced to an [`AttemptOutcome`] by the pure
//! [`classify()`] function. The client's retry loop only looks at that
//! value: `Success` returns, `Fatal` returns the error, `Retryable` backs
//! off and tries again until the attempt budget is spent.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde_json::Value;

use super::key::redact_secrets;
use crate::FredError;
use crate::limiter::MAX_PENALTY;

/// Header carrying the epoch second at which the upstream quota resets.
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Shortest penalty derived from `X-RateLimit-Reset`.
const MIN_RESET_DELAY: Duration = Duration::from_secs(1);

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff without jitter:
///
/// ```rust
/// # use fredgate::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200));
/// assert_eq!(config.delay_for_attempt(1), Duration::from_millis(400));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 5s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request).
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculate the delay for a given retry number (0-indexed).
    ///
    /// Uses exponential backoff: `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Calculate the effective delay, respecting upstream `retry_after` hints.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.delay_for_attempt(attempt))
    }
}

/// Result of a single network attempt.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    /// Transient failure; the same request may succeed later.
    Retryable(FredError),
    /// Permanent failure; retrying cannot help.
    Fatal(FredError),
}

impl<T> AttemptOutcome<T> {
    /// Classify a local error (transport failure, timeout, ...).
    pub fn from_error(err: FredError) -> Self {
        if err.is_transient() {
            AttemptOutcome::Retryable(err)
        } else {
            AttemptOutcome::Fatal(err)
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AttemptOutcome<U> {
        match self {
            AttemptOutcome::Success(value) => AttemptOutcome::Success(f(value)),
            AttemptOutcome::Retryable(e) => AttemptOutcome::Retryable(e),
            AttemptOutcome::Fatal(e) => AttemptOutcome::Fatal(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success(_))
    }
}

/// Classify an HTTP response.
///
/// - 429: retryable, carrying the upstream throttling hint if any
/// - 5xx: retryable
/// - other non-2xx: fatal, with the upstream `error_message` when present
/// - 2xx with a body that is not JSON: fatal
/// - 2xx: success with the decoded payload
///
/// Embedded `error_code`s in 2xx payloads are left to the caller so it can
/// decide whether to cache them.
pub fn classify(
    status: u16,
    headers: &HeaderMap,
    body: &[u8],
    now: SystemTime,
) -> AttemptOutcome<Value> {
    if status == 429 {
        return AttemptOutcome::Retryable(FredError::RateLimited {
            retry_after: throttle_hint(headers, now),
        });
    }

    let payload = serde_json::from_slice::<Value>(body);
    let message = |default: &str| {
        let message = payload
            .as_ref()
            .ok()
            .and_then(|p| p.get("error_message"))
            .and_then(Value::as_str)
            .unwrap_or(default);
        redact_secrets(message)
    };

    if (500..600).contains(&status) {
        return AttemptOutcome::Retryable(FredError::Server {
            status,
            message: message("upstream server error"),
        });
    }
    if !(200..300).contains(&status) {
        let code = payload
            .as_ref()
            .ok()
            .and_then(|p| p.get("error_code"))
            .and_then(Value::as_i64);
        return AttemptOutcome::Fatal(FredError::Api {
            status,
            code,
            message: message("upstream request failed"),
        });
    }

    match payload {
        Ok(payload) => AttemptOutcome::Success(payload),
        Err(e) => AttemptOutcome::Fatal(FredError::InvalidPayload(format!(
            "response body is not JSON: {e}"
        ))),
    }
}

/// Penalty requested by a 429 response.
///
/// `X-RateLimit-Reset` (epoch seconds) wins, clamped to at least one
/// second; `Retry-After` (seconds) is the fallback. Either hint is capped
/// at [`MAX_PENALTY`].
pub fn throttle_hint(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let reset = header_str(headers, RATE_LIMIT_RESET)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| !v.is_nan());
    if let Some(reset) = reset {
        let now = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let remaining = reset - now;
        let delay = if remaining <= 0.0 {
            MIN_RESET_DELAY
        } else {
            Duration::try_from_secs_f64(remaining).unwrap_or(MAX_PENALTY)
        };
        return Some(delay.clamp(MIN_RESET_DELAY, MAX_PENALTY));
    }
    header_str(headers, RETRY_AFTER.as_str())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| Duration::from_secs(secs).min(MAX_PENALTY))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

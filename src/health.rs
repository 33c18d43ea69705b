//! Operational health snapshot.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::cache::{CacheDescription, CacheManager};
use crate::client::{ClientDescription, FredClient};
use crate::limiter::{LimiterSnapshot, RateLimiter};
use crate::{PKG_VERSION, Result};

/// Overall state reported by [`HealthReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    /// A shared upstream backoff is active.
    Throttled,
}

/// Limiter, cache and client diagnostics in one serializable value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp_unix: u64,
    pub version: &'static str,
    pub cache: CacheDescription,
    pub rate_limiter: LimiterSnapshot,
    pub client: ClientDescription,
}

impl HealthReport {
    /// Collect a snapshot from live components.
    pub async fn collect(
        limiter: &RateLimiter,
        cache: &CacheManager,
        client: &FredClient,
    ) -> Self {
        let rate_limiter = limiter.snapshot();
        let status = if rate_limiter.penalty_seconds > 0.0 {
            HealthStatus::Throttled
        } else {
            HealthStatus::Ok
        };
        Self {
            status,
            timestamp_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            version: PKG_VERSION,
            cache: cache.describe().await,
            rate_limiter,
            client: client.describe(),
        }
    }

    /// Compact JSON rendering.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

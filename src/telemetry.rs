//! Telemetry metric name constants.
//!
//! Centralised metric names for fredgate operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `fredgate_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `namespace`: cache namespace / logical operation (e.g. "observations")
//! - `status`: outcome: "ok", "cached" or an error kind ("api", "server", ...)
//! - `reason`: why a retry happened ("rate_limited", "server", "http", ...)
//! - `outcome`: per-key batch result: "fetched", "missing" or "error"

/// Total logical requests answered by the client (cache hits included).
///
/// Labels: `namespace`, `status`.
pub const REQUESTS_TOTAL: &str = "fredgate_requests_total";

/// Logical request duration in seconds, including retries and waits.
///
/// Labels: `namespace`.
pub const REQUEST_DURATION_SECONDS: &str = "fredgate_request_duration_seconds";

/// Total network attempts (initial request plus retries).
///
/// Labels: `namespace`.
pub const ATTEMPTS_TOTAL: &str = "fredgate_attempts_total";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `namespace`, `reason`.
pub const RETRIES_TOTAL: &str = "fredgate_retries_total";

/// Total cache hits.
///
/// Labels: `namespace`.
pub const CACHE_HITS_TOTAL: &str = "fredgate_cache_hits_total";

/// Total cache misses.
///
/// Labels: `namespace`.
pub const CACHE_MISSES_TOTAL: &str = "fredgate_cache_misses_total";

/// Total entries written to the cache backend.
///
/// Labels: `namespace`.
pub const CACHE_STORES_TOTAL: &str = "fredgate_cache_stores_total";

/// Total namespace invalidations.
///
/// Labels: `namespace`.
pub const CACHE_INVALIDATIONS_TOTAL: &str = "fredgate_cache_invalidations_total";

/// Total slots granted by the rate limiter.
pub const RATE_LIMITER_ACQUIRE_TOTAL: &str = "fredgate_rate_limiter_acquire_total";

/// Time spent waiting for a rate limiter slot, per sleep.
pub const RATE_LIMITER_WAIT_SECONDS: &str = "fredgate_rate_limiter_wait_seconds";

/// Penalty durations registered after throttling signals.
pub const RATE_LIMITER_PENALTY_SECONDS: &str = "fredgate_rate_limiter_penalty_seconds";

/// Per-key outcomes of batch fetches.
///
/// Labels: `outcome`.
pub const BATCH_REQUESTS_TOTAL: &str = "fredgate_batch_requests_total";

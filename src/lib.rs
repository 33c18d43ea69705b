//! Fredgate - resilient access layer for the FRED economic data API
//!
//! Every call goes through the same stack:
//!
//! - [`RateLimiter`]: sliding-window request budgets shared by all callers,
//!   plus a shared cooldown extended whenever upstream throttles
//! - [`CacheManager`]: namespaced TTL cache over a pluggable
//!   [`CacheBackend`](cache::CacheBackend) (memory, disk or none)
//! - [`FredClient`]: canonical cache keys, credential-free logs, retry with
//!   exponential backoff, structured upstream errors
//! - [`FetchOrchestrator`]: bounded-concurrency batches where one key's
//!   failure never sinks the others
//!
//! # Example
//!
//! ```rust,no_run
//! use fredgate::{FetchRequest, Fredgate, QueryParams, RemoteSpec, RequestOptions};
//!
//! #[tokio::main]
//! async fn main() -> fredgate::Result<()> {
//!     let gateway = Fredgate::builder().api_key("your-fred-key").build()?;
//!
//!     let series = gateway
//!         .fetch(
//!             "series/search",
//!             &QueryParams::new().with("search_text", "gdp"),
//!             &RequestOptions::new("search_series"),
//!         )
//!         .await?;
//!     println!("{}", series.payload);
//!
//!     let batch = gateway
//!         .fetch_all(vec![
//!             FetchRequest::new("usa", RemoteSpec::observations("GDPC1")),
//!             FetchRequest::new("canada", RemoteSpec::observations("NGDPRSAXDCCAQ")),
//!             FetchRequest::unmapped("atlantis"),
//!         ])
//!         .await;
//!     println!("fetched {:?}, missing {:?}", batch.fetched.keys(), batch.missing_keys);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod health;
pub mod limiter;
pub mod orchestrator;
pub mod telemetry;

/// Crate version, reported in health snapshots and the `User-Agent`.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types at crate root
pub use cache::{CacheBackendKind, CacheConfig, CacheManager};
pub use client::{
    ClientConfig, FredClient, FredResponse, QueryParams, RequestOptions, RetryConfig,
};
pub use config::Config;
pub use error::{FredError, Result};
pub use gateway::{FredGateway, Fredgate, FredgateBuilder};
pub use health::{HealthReport, HealthStatus};
pub use limiter::{LimiterSnapshot, MAX_PENALTY, RateLimitConfig, RateLimiter, RateWindow};
pub use orchestrator::{FetchFailure, FetchOrchestrator, FetchRequest, FetchResult, RemoteSpec};

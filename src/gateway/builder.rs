//! Builder for assembling the access-layer stack

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::FredGateway;
use crate::cache::{CacheConfig, CacheManager};
use crate::client::{ClientConfig, FredClient, RetryConfig};
use crate::config::Config;
use crate::limiter::{RateLimitConfig, RateLimiter};
use crate::orchestrator::{DEFAULT_MAX_WORKERS, FetchOrchestrator};
use crate::Result;

/// Main entry point for creating gateway instances.
pub struct Fredgate;

impl Fredgate {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> FredgateBuilder {
        FredgateBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// The limiter and cache are created once here and shared by every
/// component of the built gateway. Pass existing handles with
/// [`shared_limiter()`](Self::shared_limiter) /
/// [`shared_cache()`](Self::shared_cache) to share them across gateways.
pub struct FredgateBuilder {
    client: ClientConfig,
    rate_limit: RateLimitConfig,
    cache: CacheConfig,
    max_workers: usize,
    limiter: Option<Arc<RateLimiter>>,
    cache_manager: Option<Arc<CacheManager>>,
}

impl FredgateBuilder {
    pub fn new() -> Self {
        Self {
            client: ClientConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            max_workers: DEFAULT_MAX_WORKERS,
            limiter: None,
            cache_manager: None,
        }
    }

    /// Start from a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: config.client_config(),
            rate_limit: config.rate_limit_config(),
            cache: config.cache_config(),
            max_workers: config.batch.max_workers,
            limiter: None,
            cache_manager: None,
        }
    }

    /// FRED API key, injected into every request.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.client.api_key = Some(key.into());
        self
    }

    /// Override the upstream base URL (for testing with wiremock).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.client.base_url = url.into();
        self
    }

    /// Set the whole-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.client.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.client.retry = retry;
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = config;
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Cap simultaneous requests in batch fetches.
    pub fn max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    /// Use an existing limiter instead of building one.
    pub fn shared_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Use an existing cache manager instead of building one.
    pub fn shared_cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache_manager = Some(cache);
        self
    }

    /// Build the gateway.
    pub fn build(self) -> Result<FredGateway> {
        let limiter = match self.limiter {
            Some(limiter) => limiter,
            None => Arc::new(RateLimiter::new(&self.rate_limit)),
        };
        let cache = match self.cache_manager {
            Some(cache) => cache,
            None => Arc::new(CacheManager::from_config(&self.cache)?),
        };
        let client = Arc::new(FredClient::new(
            self.client,
            Arc::clone(&limiter),
            Arc::clone(&cache),
        )?);
        let orchestrator =
            FetchOrchestrator::new(Arc::clone(&client)).with_max_workers(self.max_workers);

        info!(
            base_url = %client.config().base_url,
            limiter_enabled = limiter.is_enabled(),
            cache_backend = cache.backend_name(),
            max_workers = orchestrator.max_workers(),
            "fredgate gateway built"
        );

        Ok(FredGateway::new(limiter, cache, client, orchestrator))
    }
}

impl Default for FredgateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

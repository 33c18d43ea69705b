//! Assembled access layer

mod builder;

pub use builder::{Fredgate, FredgateBuilder};

use std::sync::Arc;

use crate::cache::CacheManager;
use crate::client::{FredClient, FredResponse, QueryParams, RequestOptions};
use crate::health::HealthReport;
use crate::limiter::RateLimiter;
use crate::orchestrator::{FetchOrchestrator, FetchRequest, FetchResult, RemoteSpec};
use crate::Result;

/// Limiter, cache, client and orchestrator wired together.
///
/// Every component shares the same limiter and cache, so budgets and
/// penalties apply across single fetches and batches alike.
#[derive(Debug, Clone)]
pub struct FredGateway {
    limiter: Arc<RateLimiter>,
    cache: Arc<CacheManager>,
    client: Arc<FredClient>,
    orchestrator: FetchOrchestrator,
}

impl FredGateway {
    pub(crate) fn new(
        limiter: Arc<RateLimiter>,
        cache: Arc<CacheManager>,
        client: Arc<FredClient>,
        orchestrator: FetchOrchestrator,
    ) -> Self {
        Self {
            limiter,
            cache,
            client,
            orchestrator,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<FredClient> {
        &self.client
    }

    pub fn orchestrator(&self) -> &FetchOrchestrator {
        &self.orchestrator
    }

    /// See [`FredClient::fetch()`].
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &QueryParams,
        options: &RequestOptions,
    ) -> Result<FredResponse> {
        self.client.fetch(endpoint, params, options).await
    }

    /// See [`FetchOrchestrator::fetch_all()`].
    pub async fn fetch_all(&self, requests: Vec<FetchRequest>) -> FetchResult {
        self.orchestrator.fetch_all(requests).await
    }

    /// See [`FetchOrchestrator::fetch_mapped()`].
    pub async fn fetch_mapped<I, F>(&self, keys: I, resolver: F) -> FetchResult
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: FnMut(&str) -> Option<RemoteSpec>,
    {
        self.orchestrator.fetch_mapped(keys, resolver).await
    }

    /// Drop every cached entry of a namespace.
    pub async fn invalidate_namespace(&self, namespace: &str) {
        self.cache.invalidate_namespace(namespace).await;
    }

    /// Current limiter, cache and client diagnostics.
    pub async fn health(&self) -> HealthReport {
        HealthReport::collect(&self.limiter, &self.cache, &self.client).await
    }
}

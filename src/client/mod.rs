//! Caching, rate-limited, retrying HTTP client for the FRED API.
//!
//! [`FredClient::fetch()`] is the single entry point:
//!
//! 1. reject malformed series ids and dates locally, then build the
//!    canonical cache key (sorted parameters, credentials removed)
//! 2. serve a cache hit immediately
//! 3. on a miss, acquire the shared [`RateLimiter`] before every attempt and
//!    retry transient failures with exponential backoff; a 429 extends the
//!    limiter's shared penalty so every other caller slows down too
//! 4. surface non-2xx statuses and embedded `error_code`s as [`FredError::Api`]
//! 5. store successful responses under the request's namespace; error
//!    payloads are stored only when [`RequestOptions::cache_errors`] is set

pub mod key;
pub mod response;
pub mod retry;
pub mod validate;

pub use key::{DEFAULT_SENSITIVE_PARAMS, QueryParams, cache_key, redact_secrets};
pub use response::FredResponse;
pub use retry::{AttemptOutcome, RetryConfig, classify, throttle_hint};
pub use validate::{validate_date, validate_params, validate_series_id};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::cache::CacheManager;
use crate::limiter::RateLimiter;
use crate::telemetry;
use crate::{FredError, PKG_VERSION, Result};

/// Default base URL of the FRED API.
pub const DEFAULT_BASE_URL: &str = "https://api.stlouisfed.org/fred";

/// Connection settings for [`FredClient`].
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL endpoints are joined onto. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,
    /// Injected as `api_key` unless the caller supplies one.
    pub api_key: Option<String>,
    /// Whole-request timeout. Default: 30s.
    pub timeout: Duration,
    /// Connect timeout. Default: 10s.
    pub connect_timeout: Duration,
    /// Default: `fredgate/<version>`.
    pub user_agent: String,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!("fredgate/{PKG_VERSION}"),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Per-call caching options.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Cache namespace, also the metrics label.
    pub namespace: String,
    /// TTL override; `None` uses the namespace default.
    pub ttl: Option<Duration>,
    /// Also cache payloads carrying an embedded `error_code`.
    pub cache_errors: bool,
}

impl RequestOptions {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ttl: None,
            cache_errors: false,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cache_errors(mut self, enabled: bool) -> Self {
        self.cache_errors = enabled;
        self
    }
}

/// Aggregated statistics for one (namespace, status) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RequestStats {
    pub count: u64,
    pub errors: u64,
    pub total_seconds: f64,
    pub min_seconds: f64,
    pub max_seconds: f64,
}

impl RequestStats {
    fn observe(&mut self, elapsed: f64, is_error: bool) {
        if self.count == 0 || elapsed < self.min_seconds {
            self.min_seconds = elapsed;
        }
        if elapsed > self.max_seconds {
            self.max_seconds = elapsed;
        }
        self.count += 1;
        self.total_seconds += elapsed;
        if is_error {
            self.errors += 1;
        }
    }

    pub fn mean_seconds(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_seconds / self.count as f64
        }
    }
}

/// Client diagnostics: namespace → status → statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientDescription {
    pub base_url: String,
    pub api_key_configured: bool,
    pub max_attempts: u32,
    pub requests: BTreeMap<String, BTreeMap<String, RequestStats>>,
}

/// HTTP client composing the rate limiter and cache manager.
///
/// Cheap to share behind an `Arc`; the limiter and cache are shared with
/// every other component holding the same handles.
pub struct FredClient {
    http: Client,
    config: ClientConfig,
    limiter: Arc<RateLimiter>,
    cache: Arc<CacheManager>,
    stats: Mutex<HashMap<(String, String), RequestStats>>,
}

impl FredClient {
    /// Create a client.
    pub fn new(
        config: ClientConfig,
        limiter: Arc<RateLimiter>,
        cache: Arc<CacheManager>,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| FredError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            limiter,
            cache,
            stats: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Absolute URL for an endpoint path such as `series/observations`.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_owned();
        }
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Fetch an endpoint through the cache, limiter and retry policy.
    ///
    /// Query parameters go in `params`. An `endpoint` carrying its own query
    /// string, a malformed `series_id` or a date parameter that is not
    /// `YYYY-MM-DD` is rejected with [`FredError::InvalidInput`] before any
    /// network traffic.
    #[instrument(
        skip(self, endpoint, params, options),
        fields(namespace = %options.namespace, endpoint = %redact_secrets(endpoint))
    )]
    pub async fn fetch(
        &self,
        endpoint: &str,
        params: &QueryParams,
        options: &RequestOptions,
    ) -> Result<FredResponse> {
        let start = Instant::now();
        let result = self.fetch_inner(endpoint, params, options).await;
        let status = match &result {
            Ok(response) if response.from_cache => "cached",
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        self.record_request(&options.namespace, start, status);
        result
    }

    async fn fetch_inner(
        &self,
        endpoint: &str,
        params: &QueryParams,
        options: &RequestOptions,
    ) -> Result<FredResponse> {
        if endpoint.trim().is_empty() {
            return Err(FredError::InvalidInput("endpoint must not be empty".into()));
        }
        if endpoint.contains('?') {
            return Err(FredError::InvalidInput(
                "endpoint must not carry a query string; pass parameters separately".into(),
            ));
        }
        validate_params(params)?;
        let url = self.endpoint_url(endpoint);
        let mut outbound = params.clone();
        if !outbound.contains("file_type") {
            outbound.push("file_type", "json");
        }
        if let Some(api_key) = &self.config.api_key {
            if !outbound.contains("api_key") {
                outbound.push("api_key", api_key);
            }
        }
        let key = cache_key(&url, &outbound, DEFAULT_SENSITIVE_PARAMS);
        let namespace = options.namespace.as_str();

        if let Some(cached) = self.cache.get::<FredResponse>(namespace, &key).await {
            debug!(key = %key, "cache hit");
            return cached.as_cache_hit().into_result();
        }

        let response = self
            .request_with_retries(&url, &outbound, &key, namespace)
            .await?;

        let embedded = response.embedded_error();
        if embedded.is_none() || options.cache_errors {
            if self.cache.set(namespace, &key, &response, options.ttl).await {
                debug!(key = %key, "stored response in cache");
            }
        } else {
            debug!(key = %key, "not caching error payload");
        }

        match embedded {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    async fn request_with_retries(
        &self,
        url: &str,
        params: &QueryParams,
        sanitized_url: &str,
        namespace: &str,
    ) -> Result<FredResponse> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            metrics::counter!(telemetry::ATTEMPTS_TOTAL, "namespace" => namespace.to_owned())
                .increment(1);

            let err = match self.attempt(url, params, sanitized_url).await {
                AttemptOutcome::Success(response) => return Ok(response),
                AttemptOutcome::Fatal(err) => return Err(err),
                AttemptOutcome::Retryable(err) => err,
            };

            if let FredError::RateLimited { retry_after } = &err {
                let penalty = retry_after.unwrap_or(self.limiter.default_penalty());
                warn!(
                    namespace,
                    penalty_ms = penalty.as_millis() as u64,
                    "upstream rate limit hit"
                );
                self.limiter.register_penalty(penalty);
            }

            attempt += 1;
            if attempt >= max_attempts {
                return Err(err);
            }

            let delay = if self.limiter.is_enabled() {
                // the limiter already holds back the next attempt for the penalty
                retry.delay_for_attempt(attempt - 1)
            } else {
                retry.effective_delay(attempt - 1, err.retry_after())
            };
            metrics::counter!(telemetry::RETRIES_TOTAL,
                "namespace" => namespace.to_owned(),
                "reason" => err.kind(),
            )
            .increment(1);
            warn!(
                namespace,
                url = sanitized_url,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt(
        &self,
        url: &str,
        params: &QueryParams,
        sanitized_url: &str,
    ) -> AttemptOutcome<FredResponse> {
        let response = match self.http.get(url).query(params.as_pairs()).send().await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::from_error(e.into()),
        };
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return AttemptOutcome::from_error(e.into()),
        };

        classify(status, &headers, &body, SystemTime::now()).map(|payload| FredResponse {
            payload,
            url: sanitized_url.to_owned(),
            status,
            headers: header_map(&headers),
            from_cache: false,
        })
    }

    fn record_request(&self, namespace: &str, start: Instant, status: &'static str) {
        let elapsed = start.elapsed().as_secs_f64();
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "namespace" => namespace.to_owned(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "namespace" => namespace.to_owned(),
        )
        .record(elapsed);

        let is_error = !matches!(status, "ok" | "cached");
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((namespace.to_owned(), status.to_owned()))
            .or_default()
            .observe(elapsed, is_error);
    }

    /// Request statistics and connection settings, for diagnostics.
    pub fn describe(&self) -> ClientDescription {
        let mut requests: BTreeMap<String, BTreeMap<String, RequestStats>> = BTreeMap::new();
        for ((namespace, status), stats) in self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            requests
                .entry(namespace.clone())
                .or_default()
                .insert(status.clone(), *stats);
        }
        ClientDescription {
            base_url: self.config.base_url.clone(),
            api_key_configured: self.config.api_key.is_some(),
            max_attempts: self.config.retry.max_attempts,
            requests,
        }
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_owned(), value.to_str().ok()?.to_owned())))
        .collect()
}

impl std::fmt::Debug for FredClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FredClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

//! Client tests against a mock upstream (wiremock).
//!
//! These run on the real clock: retry delays are configured in
//! milliseconds so the suite stays fast.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fredgate::{
    FredError, FredGateway, Fredgate, MAX_PENALTY, QueryParams, RateLimitConfig, RequestOptions,
    RetryConfig,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "test-secret-key";

fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(50))
}

fn gateway(server: &MockServer) -> FredGateway {
    Fredgate::builder()
        .api_key(API_KEY)
        .base_url(server.uri())
        .rate_limit(RateLimitConfig::disabled())
        .retry(fast_retry())
        .build()
        .expect("gateway should build")
}

fn search(text: &str) -> QueryParams {
    QueryParams::new().with("search_text", text)
}

fn series_payload() -> serde_json::Value {
    json!({
        "count": 1,
        "seriess": [{"id": "GDPC1", "title": "Real Gross Domestic Product"}]
    })
}

// ============================================================================
// Caching
// ============================================================================

/// A second identical call is served from the cache without touching the network.
#[tokio::test]
async fn success_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/search"))
        .and(query_param("api_key", API_KEY))
        .and(query_param("file_type", "json"))
        .and(query_param("search_text", "gdp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(series_payload()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let options = RequestOptions::new("search_series");

    let first = gateway
        .fetch("series/search", &search("gdp"), &options)
        .await
        .expect("first fetch");
    assert!(!first.from_cache);
    assert_eq!(first.status, 200);
    assert_eq!(first.payload["seriess"][0]["id"], "GDPC1");

    let second = gateway
        .fetch("series/search", &search("gdp"), &options)
        .await
        .expect("second fetch");
    assert!(second.from_cache);
    assert_eq!(second.payload, first.payload);

    let stats = gateway.cache().namespace_stats("search_series");
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.stores, 1);
}

/// Parameter order does not change the cache key.
#[tokio::test]
async fn parameter_order_shares_cache_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/observations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"observations": []})))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let options = RequestOptions::new("observations");
    let forward = QueryParams::new()
        .with("series_id", "GDPC1")
        .with("observation_start", "2020-01-01");
    let reversed = QueryParams::new()
        .with("observation_start", "2020-01-01")
        .with("series_id", "GDPC1");

    gateway
        .fetch("series/observations", &forward, &options)
        .await
        .expect("first fetch");
    let cached = gateway
        .fetch("series/observations", &reversed, &options)
        .await
        .expect("second fetch");
    assert!(cached.from_cache);
}

/// Credentials never reach the cache key: differing keys hit the same entry.
#[tokio::test]
async fn api_key_is_excluded_from_cache_key_and_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(series_payload()))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let options = RequestOptions::new("search_series");

    let first = gateway
        .fetch(
            "series/search",
            &search("gdp").with("api_key", "first-key"),
            &options,
        )
        .await
        .expect("first fetch");
    let second = gateway
        .fetch(
            "series/search",
            &search("gdp").with("api_key", "second-key"),
            &options,
        )
        .await
        .expect("second fetch");

    assert!(second.from_cache);
    for response in [&first, &second] {
        assert!(!response.url.contains("api_key"), "url: {}", response.url);
        assert!(!response.url.contains("first-key"));
        assert!(!response.url.contains(API_KEY));
    }
}

/// An embedded `error_code` in a 200 response is an error and is not cached.
#[tokio::test]
async fn embedded_error_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 400,
            "error_message": "Bad Request. Variable search_text is not set."
        })))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let options = RequestOptions::new("search_series");

    for _ in 0..2 {
        let err = gateway
            .fetch("series/search", &search(""), &options)
            .await
            .expect_err("embedded error");
        match err {
            FredError::Api { code, message, .. } => {
                assert_eq!(code, Some(400));
                assert!(message.contains("search_text"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }
    assert_eq!(gateway.cache().namespace_stats("search_series").stores, 0);
}

/// A non-numeric `error_code` still marks the payload as an error.
#[tokio::test]
async fn non_numeric_error_code_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": "E1",
            "error_message": "Quota exhausted."
        })))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let options = RequestOptions::new("search_series");
    for _ in 0..2 {
        let err = gateway
            .fetch("series/search", &search("gdp"), &options)
            .await
            .expect_err("embedded error");
        assert!(matches!(err, FredError::Api { code: None, .. }), "{err:?}");
    }
    assert_eq!(gateway.cache().namespace_stats("search_series").stores, 0);
}

/// With `cache_errors`, the error payload is stored and replayed as an error.
#[tokio::test]
async fn embedded_error_is_cached_on_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error_code": 404,
            "error_message": "Not Found"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let options = RequestOptions::new("search_series").cache_errors(true);

    for _ in 0..2 {
        let err = gateway
            .fetch("series/search", &search("nothing"), &options)
            .await
            .expect_err("embedded error");
        assert!(matches!(err, FredError::Api { code: Some(404), .. }));
    }
    let stats = gateway.cache().namespace_stats("search_series");
    assert_eq!(stats.stores, 1);
    assert_eq!(stats.hits, 1);
}

/// A per-call TTL override shorter than the namespace default is honoured.
#[tokio::test]
async fn ttl_override_expires_entry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/category"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"categories": []})))
        .expect(2)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let options = RequestOptions::new("category").ttl(Duration::from_millis(100));
    let params = QueryParams::new().with("category_id", 125);

    gateway
        .fetch("category", &params, &options)
        .await
        .expect("first fetch");
    tokio::time::sleep(Duration::from_millis(300)).await;
    let refetched = gateway
        .fetch("category", &params, &options)
        .await
        .expect("second fetch");
    assert!(!refetched.from_cache);
}

// ============================================================================
// Retries and error classification
// ============================================================================

/// 5xx responses are retried until one succeeds.
#[tokio::test]
async fn server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(series_payload()))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let response = gateway
        .fetch(
            "series",
            &QueryParams::new().with("series_id", "GDPC1"),
            &RequestOptions::new("series"),
        )
        .await
        .expect("third attempt succeeds");
    assert_eq!(response.status, 200);

    let received = server.received_requests().await.expect("recording enabled");
    assert_eq!(received.len(), 3);
}

/// When every attempt fails the last transient error is returned.
#[tokio::test]
async fn retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error_message": "Service Unavailable"
        })))
        .expect(3)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let err = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await
        .expect_err("all attempts fail");
    assert!(err.is_transient());
    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("Service Unavailable"));
}

/// 4xx responses other than 429 fail immediately, without retry, and the
/// returned message never carries the key.
#[tokio::test]
async fn client_errors_are_fatal_and_redacted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": 400,
            "error_message": format!("Bad Request. The value api_key={API_KEY} is not registered.")
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let err = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await
        .expect_err("bad request");

    assert!(!err.is_transient());
    match &err {
        FredError::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(*status, 400);
            assert_eq!(*code, Some(400));
            assert!(!message.contains(API_KEY), "message leaked key: {message}");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    assert!(!err.to_string().contains(API_KEY));
}

/// Credentials smuggled into the endpoint path never reach the network or a key.
#[tokio::test]
async fn endpoint_with_query_string_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(series_payload()))
        .expect(0)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let endpoint = format!("{}/series?api_key={API_KEY}", server.uri());
    let err = gateway
        .fetch(&endpoint, &QueryParams::new(), &RequestOptions::new("series"))
        .await
        .expect_err("query in endpoint");
    assert!(matches!(err, FredError::InvalidInput(_)));
    assert!(!err.to_string().contains(API_KEY));
}

/// A 200 response that is not JSON is a payload error.
#[tokio::test]
async fn non_json_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let err = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await
        .expect_err("html body");
    assert!(matches!(err, FredError::InvalidPayload(_)));
}

/// Attempts that exceed the request timeout surface as `Timeout`.
#[tokio::test]
async fn slow_upstream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(series_payload())
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let gateway = Fredgate::builder()
        .api_key(API_KEY)
        .base_url(server.uri())
        .rate_limit(RateLimitConfig::disabled())
        .retry(RetryConfig::disabled())
        .timeout(Duration::from_millis(200))
        .build()
        .expect("gateway should build");

    let err = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await
        .expect_err("timeout");
    assert!(matches!(err, FredError::Timeout), "got {err:?}");
    assert!(err.is_transient());
}

// ============================================================================
// Upstream throttling
// ============================================================================

fn throttled_gateway(server: &MockServer, retry: RetryConfig) -> FredGateway {
    Fredgate::builder()
        .api_key(API_KEY)
        .base_url(server.uri())
        .rate_limit(
            RateLimitConfig::new()
                .per_second(100)
                .penalty(Duration::from_secs(2)),
        )
        .retry(retry)
        .build()
        .expect("gateway should build")
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
}

/// A 429 with `X-RateLimit-Reset` sets the shared penalty to the reset time.
#[tokio::test]
async fn rate_limit_reset_header_sets_penalty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("X-RateLimit-Reset", (epoch_secs() + 5).to_string()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = throttled_gateway(&server, RetryConfig::disabled());
    let err = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await
        .expect_err("throttled");
    assert!(matches!(err, FredError::RateLimited { .. }));

    let penalty = gateway.limiter().penalty_remaining().as_secs_f64();
    assert!(penalty > 3.5 && penalty <= 5.0, "penalty {penalty}");
    // any other caller now has to wait too
    assert!(gateway.limiter().required_wait() > Duration::from_secs(3));
}

/// Without a reset header, `Retry-After` is used.
#[tokio::test]
async fn retry_after_header_sets_penalty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
        .mount(&server)
        .await;

    let gateway = throttled_gateway(&server, RetryConfig::disabled());
    let _ = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await;

    let penalty = gateway.limiter().penalty_remaining().as_secs_f64();
    assert!(penalty > 2.5 && penalty <= 3.0, "penalty {penalty}");
}

/// An absurd `Retry-After` is capped instead of freezing (or crashing) the limiter.
#[tokio::test]
async fn oversized_retry_after_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("Retry-After", "18446744073709551615"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let gateway = throttled_gateway(&server, RetryConfig::disabled());
    let handle = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            gateway
                .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
                .await
        })
    };
    let err = handle
        .await
        .expect("fetch must not panic")
        .expect_err("throttled");
    match err {
        FredError::RateLimited { retry_after } => assert_eq!(retry_after, Some(MAX_PENALTY)),
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert!(gateway.limiter().penalty_remaining() <= MAX_PENALTY);
}

/// Without any hint, the configured default penalty applies.
#[tokio::test]
async fn bare_429_uses_default_penalty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let gateway = throttled_gateway(&server, RetryConfig::disabled());
    let _ = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await;

    let penalty = gateway.limiter().penalty_remaining().as_secs_f64();
    assert!(penalty > 1.5 && penalty <= 2.0, "penalty {penalty}");
}

/// The retry after a 429 waits out the penalty before hitting upstream again.
#[tokio::test]
async fn throttled_request_waits_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(200).set_body_json(series_payload()))
        .mount(&server)
        .await;

    let gateway = throttled_gateway(&server, fast_retry());
    let start = std::time::Instant::now();
    let response = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await
        .expect("second attempt succeeds");
    assert_eq!(response.status, 200);
    assert!(start.elapsed() >= Duration::from_millis(900));
}

// ============================================================================
// Diagnostics
// ============================================================================

#[tokio::test]
async fn describe_groups_requests_by_namespace_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(series_payload()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error_code": 404,
            "error_message": "Not Found"
        })))
        .mount(&server)
        .await;

    let gateway = gateway(&server);
    let options = RequestOptions::new("search_series");
    for _ in 0..3 {
        gateway
            .fetch("series/search", &search("gdp"), &options)
            .await
            .expect("search");
    }
    let _ = gateway
        .fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await;

    let description = gateway.client().describe();
    assert!(description.api_key_configured);
    assert_eq!(description.max_attempts, 3);

    let search_stats = &description.requests["search_series"];
    assert_eq!(search_stats["ok"].count, 1);
    assert_eq!(search_stats["cached"].count, 2);
    assert_eq!(search_stats["ok"].errors, 0);

    let series_stats = &description.requests["series"];
    assert_eq!(series_stats["api"].count, 1);
    assert_eq!(series_stats["api"].errors, 1);

    let json = serde_json::to_string(&description).expect("serialize");
    assert!(!json.contains(API_KEY));
}

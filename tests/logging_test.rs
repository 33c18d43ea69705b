//! Log output never carries the API key, whatever path a request takes.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fredgate::{
    FetchRequest, FredGateway, Fredgate, QueryParams, RateLimitConfig, RemoteSpec,
    RequestOptions, RetryConfig,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API_KEY: &str = "log-capture-secret";

/// Shared in-memory sink for formatted log lines.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture() -> (LogBuffer, tracing::subscriber::DefaultGuard) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("fredgate=trace"))
        .with_writer(buffer.clone())
        .with_ansi(false)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}

fn gateway(base_url: &str) -> FredGateway {
    Fredgate::builder()
        .api_key(API_KEY)
        .base_url(base_url)
        .rate_limit(RateLimitConfig::disabled())
        .retry(
            RetryConfig::new()
                .max_attempts(2)
                .initial_delay(Duration::from_millis(5))
                .max_delay(Duration::from_millis(10)),
        )
        .timeout(Duration::from_secs(2))
        .build()
        .expect("gateway should build")
}

// Runs on the current-thread runtime so spawned batch workers log through
// the thread-local subscriber too.
#[tokio::test]
async fn api_key_never_appears_in_logs() {
    let (logs, _guard) = capture();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/series/search"))
        .and(query_param("api_key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"seriess": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error_code": 400,
            "error_message": format!("Bad Request. api_key={API_KEY} is not registered.")
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/category"))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series/observations"))
        .and(query_param("series_id", "GDPC1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "observations": [{"date": "2020-01-01", "value": "1"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/series/observations"))
        .and(query_param("series_id", "MISSING"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"observations": []})))
        .mount(&server)
        .await;

    let gw = gateway(&server.uri());
    let search = QueryParams::new().with("search_text", "gdp");
    let options = RequestOptions::new("search_series");
    gw.fetch("series/search", &search, &options)
        .await
        .expect("success");
    gw.fetch("series/search", &search, &options)
        .await
        .expect("cache hit");
    gw.fetch("series", &QueryParams::new(), &RequestOptions::new("series"))
        .await
        .expect_err("client error");
    gw.fetch("category", &QueryParams::new(), &RequestOptions::new("category"))
        .await
        .expect_err("server error after retry");

    let batch = gw
        .fetch_all(vec![
            FetchRequest::new("usa", RemoteSpec::observations("GDPC1")),
            FetchRequest::new("nowhere", RemoteSpec::observations("MISSING")),
            FetchRequest::new("broken", RemoteSpec::new("X", "series", "series")),
            FetchRequest::unmapped("atlantis"),
        ])
        .await;
    assert_eq!(batch.fetched.len(), 1);
    assert_eq!(batch.errors.len(), 1);

    // nothing listens on the discard port
    let unreachable = gateway("http://127.0.0.1:9");
    unreachable
        .fetch("series/search", &search, &options)
        .await
        .expect_err("connect error");

    let output = logs.contents();
    assert!(
        output.contains("retrying after transient error"),
        "expected retry logs, got:\n{output}"
    );
    assert!(output.contains("batch key failed"));
    assert!(
        !output.contains(API_KEY),
        "api key leaked into logs:\n{output}"
    );
}

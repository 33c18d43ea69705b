//! Bounded-concurrency multi-key fetches.
//!
//! [`FetchOrchestrator::fetch_all()`] takes any number of independent
//! requests and runs them through a shared [`FredClient`] with at most
//! `max_workers` in flight. Each key's outcome lands in the returned
//! [`FetchResult`]; a failing key never cancels its siblings and never
//! turns the whole batch into an error.
//!
//! Workers are spawned tasks. Dropping the `fetch_all` future stops
//! scheduling new keys but lets in-flight requests run to completion.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::client::{FredClient, FredResponse, QueryParams, RequestOptions, redact_secrets};
use crate::telemetry;
use crate::FredError;

/// Default cap on simultaneous upstream requests per batch.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// How to fetch one key from upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSpec {
    /// Upstream identifier (e.g. a series id), reported with failures.
    pub id: String,
    pub endpoint: String,
    pub params: QueryParams,
    pub namespace: String,
    pub ttl: Option<Duration>,
    /// Payload field that must be present and non-empty; otherwise the key
    /// is reported missing.
    pub require_non_empty: Option<String>,
}

impl RemoteSpec {
    pub fn new(
        id: impl Into<String>,
        endpoint: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            params: QueryParams::new(),
            namespace: namespace.into(),
            ttl: None,
            require_non_empty: None,
        }
    }

    /// Observations of one series.
    ///
    /// ```rust
    /// # use fredgate::RemoteSpec;
    /// let spec = RemoteSpec::observations("GDPC1").observation_start("2000-01-01");
    /// assert_eq!(spec.params.get("series_id"), Some("GDPC1"));
    /// assert_eq!(spec.namespace, "observations");
    /// ```
    pub fn observations(series_id: impl Into<String>) -> Self {
        let series_id = series_id.into();
        let mut spec = Self::new(series_id.clone(), "series/observations", "observations");
        spec.params.push("series_id", series_id);
        spec.require_non_empty = Some("observations".to_owned());
        spec
    }

    pub fn observation_start(self, date: impl ToString) -> Self {
        self.param("observation_start", date)
    }

    pub fn observation_end(self, date: impl ToString) -> Self {
        self.param("observation_end", date)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push(key, value);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn require_non_empty(mut self, field: impl Into<String>) -> Self {
        self.require_non_empty = Some(field.into());
        self
    }

    fn request_options(&self) -> RequestOptions {
        RequestOptions {
            namespace: self.namespace.clone(),
            ttl: self.ttl,
            cache_errors: false,
        }
    }
}

/// One key of a batch. `target: None` means the key has no upstream
/// mapping; it is reported missing without using a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub key: String,
    pub target: Option<RemoteSpec>,
}

impl FetchRequest {
    pub fn new(key: impl Into<String>, target: RemoteSpec) -> Self {
        Self {
            key: key.into(),
            target: Some(target),
        }
    }

    pub fn unmapped(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            target: None,
        }
    }
}

/// A key that failed, with enough context to retry or report it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchFailure {
    pub key: String,
    pub remote_id: String,
    pub message: String,
    /// Whether retrying the key later may succeed.
    pub transient: bool,
    pub status: Option<u16>,
}

/// Outcome of a batch. Always produced, even if every key failed.
///
/// Every submitted request is accounted for exactly once; a key repeated
/// within one batch is fetched once and its repeats land in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchResult {
    /// Successful responses by key.
    pub fetched: BTreeMap<String, FredResponse>,
    /// Upstream identifier of every fetched key.
    pub sources: BTreeMap<String, String>,
    /// Keys with no mapping or no data.
    pub missing_keys: Vec<String>,
    pub errors: Vec<FetchFailure>,
    pub started_at_unix: u64,
    pub elapsed_ms: u64,
}

impl FetchResult {
    pub fn fetched_keys(&self) -> impl Iterator<Item = &str> {
        self.fetched.keys().map(String::as_str)
    }

    /// True when every key was fetched.
    pub fn is_complete(&self) -> bool {
        self.missing_keys.is_empty() && self.errors.is_empty()
    }

    /// Total keys accounted for.
    pub fn len(&self) -> usize {
        self.fetched.len() + self.missing_keys.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Outcome {
    Fetched(FredResponse),
    Missing,
    Failed(FredError),
}

/// A unit of work for [`run_bounded()`].
struct Job<F> {
    key: String,
    remote_id: String,
    task: F,
}

/// Spawn every job with at most `max_workers` running, yielding results
/// in completion order.
async fn run_bounded<F>(
    jobs: VecDeque<Job<F>>,
    max_workers: usize,
) -> Vec<(String, String, Result<F::Output, JoinError>)>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut jobs = jobs;
    let mut in_flight = FuturesUnordered::new();
    let mut done = Vec::with_capacity(jobs.len());

    let spawn = |job: Job<F>| {
        let handle = tokio::spawn(job.task);
        async move { (job.key, job.remote_id, handle.await) }
    };

    while in_flight.len() < max_workers.max(1) {
        match jobs.pop_front() {
            Some(job) => in_flight.push(spawn(job)),
            None => break,
        }
    }
    while let Some(finished) = in_flight.next().await {
        done.push(finished);
        if let Some(job) = jobs.pop_front() {
            in_flight.push(spawn(job));
        }
    }
    done
}

/// Runs batches of independent requests through a shared client.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    client: Arc<FredClient>,
    max_workers: usize,
}

impl FetchOrchestrator {
    pub fn new(client: Arc<FredClient>) -> Self {
        Self {
            client,
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Cap simultaneous requests (at least 1).
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn client(&self) -> &Arc<FredClient> {
        &self.client
    }

    /// Fetch every request. Never fails; see [`FetchResult`].
    pub async fn fetch_all(&self, requests: Vec<FetchRequest>) -> FetchResult {
        let started = Instant::now();
        let mut result = FetchResult {
            started_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            ..FetchResult::default()
        };

        let mut jobs = VecDeque::new();
        let mut seen = HashSet::new();
        for request in requests {
            if !seen.insert(request.key.clone()) {
                warn!(key = %request.key, "duplicate key in batch");
                record_outcome("error");
                result.errors.push(FetchFailure {
                    remote_id: request.target.map(|spec| spec.id).unwrap_or_default(),
                    key: request.key,
                    message: "duplicate key in batch; only the first occurrence is fetched"
                        .to_owned(),
                    transient: false,
                    status: None,
                });
                continue;
            }
            match request.target {
                Some(spec) => {
                    let client = Arc::clone(&self.client);
                    jobs.push_back(Job {
                        key: request.key,
                        remote_id: spec.id.clone(),
                        task: fetch_one(client, spec),
                    });
                }
                None => {
                    warn!(key = %request.key, "no upstream mapping for key");
                    record_outcome("missing");
                    result.missing_keys.push(request.key);
                }
            }
        }

        let total = jobs.len();
        let workers = self.max_workers.min(total.max(1));
        info!(requests = total, workers, "starting batch fetch");

        for (key, remote_id, joined) in run_bounded(jobs, workers).await {
            match joined {
                Ok(Outcome::Fetched(response)) => {
                    record_outcome("fetched");
                    result.sources.insert(key.clone(), remote_id);
                    result.fetched.insert(key, response);
                }
                Ok(Outcome::Missing) => {
                    record_outcome("missing");
                    result.missing_keys.push(key);
                }
                Ok(Outcome::Failed(err)) => {
                    record_outcome("error");
                    warn!(key = %key, remote_id = %remote_id, error = %err, "batch key failed");
                    result.errors.push(FetchFailure {
                        key,
                        remote_id,
                        message: redact_secrets(&err.to_string()),
                        transient: err.is_transient(),
                        status: err.status(),
                    });
                }
                Err(join_err) => {
                    record_outcome("error");
                    warn!(key = %key, remote_id = %remote_id, error = %join_err, "batch worker panicked");
                    result.errors.push(FetchFailure {
                        key,
                        remote_id,
                        message: format!("worker failed: {join_err}"),
                        transient: false,
                        status: None,
                    });
                }
            }
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            fetched = result.fetched.len(),
            missing = result.missing_keys.len(),
            errors = result.errors.len(),
            elapsed_ms = result.elapsed_ms,
            "batch fetch finished"
        );
        result
    }

    /// Resolve each key with `resolver` and fetch the mapped ones.
    ///
    /// Keys the resolver maps to `None` are reported missing.
    pub async fn fetch_mapped<I, F>(&self, keys: I, mut resolver: F) -> FetchResult
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: FnMut(&str) -> Option<RemoteSpec>,
    {
        let requests = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                let target = resolver(&key);
                FetchRequest { key, target }
            })
            .collect();
        self.fetch_all(requests).await
    }
}

async fn fetch_one(client: Arc<FredClient>, spec: RemoteSpec) -> Outcome {
    let options = spec.request_options();
    match client.fetch(&spec.endpoint, &spec.params, &options).await {
        Ok(response) => match &spec.require_non_empty {
            Some(field) if is_empty_field(&response.payload, field) => {
                warn!(remote_id = %spec.id, field = %field, "no data for remote id");
                Outcome::Missing
            }
            _ => Outcome::Fetched(response),
        },
        Err(err) => Outcome::Failed(err),
    }
}

/// Absent, null, or an empty array/object/string.
fn is_empty_field(payload: &Value, field: &str) -> bool {
    match payload.get(field) {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!(telemetry::BATCH_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
}

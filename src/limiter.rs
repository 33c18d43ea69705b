//! Coordinated sliding-window rate limiter.
//!
//! A [`RateLimiter`] enforces any number of request budgets at once (e.g.
//! 2 requests/second *and* 120 requests/minute) across every task sharing
//! it, plus a shared cooldown ("penalty") that any caller can extend after
//! observing a throttling signal from upstream.
//!
//! # Algorithm
//!
//! Each budget is a [`RateWindow`]: a deque of admission timestamps. On
//! [`acquire()`](RateLimiter::acquire) the windows are pruned and the
//! required wait is computed as the maximum of the remaining penalty and,
//! for every full window, the time until its oldest timestamp leaves the
//! window. A zero wait reserves the slot in every window within the same
//! critical section. Otherwise the lock is released, the task sleeps, and
//! the whole check is repeated, so a stale estimate never admits a request.
//!
//! Time is read from [`tokio::time::Instant`], which makes the limiter
//! deterministic under `tokio::time::pause()`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::telemetry;

/// Longest shared cooldown a single throttling signal can impose.
pub const MAX_PENALTY: Duration = Duration::from_secs(60 * 60);

/// Configuration for the coordinated rate limiter.
///
/// ```rust
/// # use fredgate::RateLimitConfig;
/// # use std::time::Duration;
/// let config = RateLimitConfig::new()
///     .per_second(2)
///     .per_minute(120)
///     .penalty(Duration::from_secs(5));
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Master switch. Default: true.
    pub enabled: bool,
    /// Requests allowed per rolling second. Default: none.
    pub per_second: Option<u32>,
    /// Requests allowed per rolling minute. Default: 120.
    pub per_minute: Option<u32>,
    /// Cooldown applied on throttling when upstream gives no hint. Default: 5s.
    pub penalty: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_second: None,
            per_minute: Some(120),
            penalty: Duration::from_secs(5),
        }
    }
}

impl RateLimitConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables limiting entirely.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the per-second budget.
    pub fn per_second(mut self, n: u32) -> Self {
        self.per_second = Some(n);
        self
    }

    /// Set the per-minute budget.
    pub fn per_minute(mut self, n: u32) -> Self {
        self.per_minute = Some(n);
        self
    }

    /// Set the default penalty applied on throttling.
    pub fn penalty(mut self, penalty: Duration) -> Self {
        self.penalty = penalty;
        self
    }

    /// Build the windows described by this config. Zero budgets are skipped.
    fn windows(&self) -> Vec<RateWindow> {
        let mut windows = Vec::new();
        if let Some(n) = self.per_second.filter(|n| *n > 0) {
            windows.push(RateWindow::new(n as usize, Duration::from_secs(1)));
        }
        if let Some(n) = self.per_minute.filter(|n| *n > 0) {
            windows.push(RateWindow::new(n as usize, Duration::from_secs(60)));
        }
        windows
    }
}

/// Sliding window tracker enforcing an upper bound on admissions.
///
/// Invariant: after pruning, `len() <= capacity`.
#[derive(Debug, Clone)]
pub struct RateWindow {
    capacity: usize,
    window: Duration,
    timestamps: VecDeque<Instant>,
}

impl RateWindow {
    /// Create an empty window admitting `capacity` events per `window`.
    pub fn new(capacity: usize, window: Duration) -> Self {
        Self {
            capacity,
            window,
            timestamps: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of admissions currently recorded (without pruning).
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Drop timestamps that are `window` or more in the past.
    fn prune(&mut self, now: Instant) {
        let Some(threshold) = now.checked_sub(self.window) else {
            return;
        };
        while self.timestamps.front().is_some_and(|t| *t <= threshold) {
            self.timestamps.pop_front();
        }
    }

    /// Time until one more admission fits in this window.
    fn required_wait(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.timestamps.len() < self.capacity {
            return Duration::ZERO;
        }
        match self.timestamps.front() {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    fn record(&mut self, now: Instant) {
        self.prune(now);
        self.timestamps.push_back(now);
    }
}

/// Read-only view of a configured budget.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetSnapshot {
    pub capacity: usize,
    pub window_secs: f64,
}

/// Diagnostic snapshot of limiter state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimiterSnapshot {
    pub enabled: bool,
    pub budgets: Vec<BudgetSnapshot>,
    /// Seconds until the shared cooldown expires (0 when none is active).
    pub penalty_seconds: f64,
}

/// Mutable limiter state. Only touched while holding the limiter's lock.
#[derive(Debug)]
struct LimiterState {
    windows: Vec<RateWindow>,
    penalty_until: Option<Instant>,
}

impl LimiterState {
    fn required_wait(&mut self, now: Instant) -> Duration {
        let penalty = self
            .penalty_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or(Duration::ZERO);
        self.windows
            .iter_mut()
            .map(|w| w.required_wait(now))
            .fold(penalty, Duration::max)
    }
}

/// Rate limiter shared by every request issued through a client.
///
/// Construct once at startup and share via `Arc`. With no positive budget
/// configured the limiter disables itself and [`acquire()`](Self::acquire)
/// returns immediately.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    default_penalty: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        let windows = config.windows();
        if config.enabled && windows.is_empty() {
            warn!("rate limiter enabled without any positive budget; limiting disabled");
        }
        let limiter = Self::build(config.enabled, windows, config.penalty);
        if limiter.enabled {
            info!(
                per_second = config.per_second,
                per_minute = config.per_minute,
                "rate limiter configured"
            );
        } else {
            info!("rate limiter disabled");
        }
        limiter
    }

    /// Create an enabled limiter from explicit windows.
    pub fn with_windows(windows: Vec<RateWindow>, default_penalty: Duration) -> Self {
        Self::build(true, windows, default_penalty)
    }

    /// Create a limiter that never waits.
    pub fn disabled() -> Self {
        Self::build(false, Vec::new(), Duration::ZERO)
    }

    fn build(enabled: bool, windows: Vec<RateWindow>, default_penalty: Duration) -> Self {
        let windows: Vec<RateWindow> = windows.into_iter().filter(|w| w.capacity > 0).collect();
        Self {
            enabled: enabled && !windows.is_empty(),
            default_penalty,
            state: Mutex::new(LimiterState {
                windows,
                penalty_until: None,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Penalty applied on throttling when upstream gives no hint.
    pub fn default_penalty(&self) -> Duration {
        self.default_penalty
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until one more request fits every budget, then reserve it.
    pub async fn acquire(&self) {
        if !self.enabled {
            return;
        }
        loop {
            let wait = {
                let mut state = self.lock();
                let now = Instant::now();
                let wait = state.required_wait(now);
                if wait.is_zero() {
                    for window in &mut state.windows {
                        window.record(now);
                    }
                    metrics::counter!(telemetry::RATE_LIMITER_ACQUIRE_TOTAL).increment(1);
                    return;
                }
                wait
            };
            debug!(wait_ms = wait.as_millis() as u64, "waiting for rate limiter slot");
            metrics::histogram!(telemetry::RATE_LIMITER_WAIT_SECONDS).record(wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }
    }

    /// Current wait a caller of [`acquire()`](Self::acquire) would observe.
    ///
    /// Does not reserve a slot.
    pub fn required_wait(&self) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        self.lock().required_wait(Instant::now())
    }

    /// Extend the shared cooldown so it lasts at least `delay` from now.
    ///
    /// The deadline only ever moves forward; a shorter penalty than the one
    /// already active is a no-op. Zero delays are ignored and delays above
    /// [`MAX_PENALTY`] are capped.
    pub fn register_penalty(&self, delay: Duration) {
        if !self.enabled || delay.is_zero() {
            return;
        }
        let delay = delay.min(MAX_PENALTY);
        let extended = {
            let mut state = self.lock();
            let now = Instant::now();
            let until = now.checked_add(delay).unwrap_or(now);
            if state.penalty_until.is_none_or(|current| until > current) {
                state.penalty_until = Some(until);
                true
            } else {
                false
            }
        };
        if extended {
            warn!(delay_ms = delay.as_millis() as u64, "applying shared backoff");
        }
        metrics::histogram!(telemetry::RATE_LIMITER_PENALTY_SECONDS).record(delay.as_secs_f64());
    }

    /// Seconds remaining on the shared cooldown.
    pub fn penalty_remaining(&self) -> Duration {
        self.lock()
            .penalty_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self) -> LimiterSnapshot {
        let state = self.lock();
        let penalty = state
            .penalty_until
            .map(|until| until.saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);
        LimiterSnapshot {
            enabled: self.enabled,
            budgets: state
                .windows
                .iter()
                .map(|w| BudgetSnapshot {
                    capacity: w.capacity,
                    window_secs: w.window.as_secs_f64(),
                })
                .collect(),
            penalty_seconds: penalty.as_secs_f64(),
        }
    }
}

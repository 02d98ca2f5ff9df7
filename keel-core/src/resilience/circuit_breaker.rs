//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker isolates a failing dependency by rejecting calls once
//! failures within a sampling window reach a threshold.
//!
//! ## States
//!
//! - **Closed**: calls pass through; requests and failures are counted per
//!   sampling window
//! - **Open**: calls fail immediately with `CircuitOpen` until the break
//!   duration has elapsed
//! - **Half-Open**: a limited number of trial calls are admitted; a single
//!   failure reopens the circuit, enough consecutive successes close it
//!
//! ## Example
//!
//! ```rust,ignore
//! use keel_core::resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("state")
//!         .failure_count_threshold(3)
//!         .break_duration(Duration::from_secs(30)),
//! );
//!
//! let value = breaker.execute(|| async { adapter.get(&ctx, "key").await }).await?;
//! ```

use crate::error::{Error, ErrorKind, Result};
use futures::FutureExt;
use keel_log::Logger;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, probing recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Callback fired on every state transition with `(name, from, to)`.
pub type StateChangeCallback = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

/// Decides whether an error counts toward tripping the circuit.
pub type FailurePredicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Errors that say nothing about the health of the wrapped dependency.
fn default_is_failure(err: &Error) -> bool {
    !matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::Cancelled | ErrorKind::BadRequest
    )
}

/// Circuit breaker configuration.
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the circuit breaker (for logging and `CircuitOpen` errors).
    pub name: String,
    /// Trial calls admitted while half-open; also the number of consecutive
    /// successes needed to close again.
    pub max_requests_in_half_open: u32,
    /// Length of the closed-state counting window. Zero never resets.
    pub sampling_interval: Duration,
    /// Time spent open before probing.
    pub break_duration: Duration,
    /// Failures within a window that trip the circuit.
    pub failure_count_threshold: u32,
    /// Failure ratio that trips the circuit. When set, replaces the count rule.
    pub failure_ratio_threshold: Option<f64>,
    /// Requests required in a window before the ratio rule applies.
    pub min_requests_for_ratio: Option<u32>,
    /// Fired on every transition.
    pub on_state_change: Option<StateChangeCallback>,
    /// Overrides which errors count as failures.
    pub is_failure: Option<FailurePredicate>,
    /// Logging collaborator.
    pub logger: Logger,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_requests_in_half_open: 1,
            sampling_interval: Duration::from_secs(60),
            break_duration: Duration::from_secs(60),
            failure_count_threshold: 5,
            failure_ratio_threshold: None,
            min_requests_for_ratio: None,
            on_state_change: None,
            is_failure: None,
            logger: Logger::global(),
        }
    }
}

impl std::fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("name", &self.name)
            .field("max_requests_in_half_open", &self.max_requests_in_half_open)
            .field("sampling_interval", &self.sampling_interval)
            .field("break_duration", &self.break_duration)
            .field("failure_count_threshold", &self.failure_count_threshold)
            .field("failure_ratio_threshold", &self.failure_ratio_threshold)
            .field("min_requests_for_ratio", &self.min_requests_for_ratio)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the number of half-open trial calls.
    pub fn max_requests_in_half_open(mut self, count: u32) -> Self {
        self.max_requests_in_half_open = count;
        self
    }

    /// Set the sampling window.
    pub fn sampling_interval(mut self, interval: Duration) -> Self {
        self.sampling_interval = interval;
        self
    }

    /// Set the break duration.
    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Set the failure count threshold.
    pub fn failure_count_threshold(mut self, threshold: u32) -> Self {
        self.failure_count_threshold = threshold;
        self
    }

    /// Trip on failure ratio instead of count.
    pub fn failure_ratio(mut self, ratio: f64, min_requests: u32) -> Self {
        self.failure_ratio_threshold = Some(ratio);
        self.min_requests_for_ratio = Some(min_requests);
        self
    }

    /// Register a transition callback.
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(callback));
        self
    }

    /// Override which errors count as failures.
    pub fn failure_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.is_failure = Some(Arc::new(predicate));
        self
    }

    /// Set the logger.
    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    fn half_open_limit(&self) -> u32 {
        self.max_requests_in_half_open.max(1)
    }
}

/// Request and outcome counts for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn in_flight(&self) -> u32 {
        self.requests
            .saturating_sub(self.total_successes.saturating_add(self.total_failures))
    }
}

/// Snapshot of lifetime totals.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub total_requests: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub current: Counts,
}

type Transitions = Vec<(CircuitState, CircuitState)>;

struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    /// Closed: end of the sampling window. Open: end of the break.
    /// Half-open: deadline for the trial calls in flight.
    expiry: Option<Instant>,
}

/// Circuit breaker for isolating a failing dependency.
///
/// Calls go through [`execute`](Self::execute). The internal lock is held only
/// while admitting a call and while recording its outcome, never across the
/// wrapped future.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    total_requests: AtomicU64,
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        keel_log::debug!(
            logger: config.logger,
            "Circuit breaker '{}' initialized (failure threshold {}, break {:?})",
            config.name,
            config.failure_count_threshold,
            config.break_duration
        );

        let expiry = (!config.sampling_interval.is_zero())
            .then(|| Instant::now() + config.sampling_interval);

        Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
            total_requests: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state, applying any time-based transition that is due.
    pub fn state(&self) -> CircuitState {
        let mut transitions = Transitions::new();
        let state = {
            let mut inner = self.inner.lock();
            self.current_state(&mut inner, Instant::now(), &mut transitions)
                .0
        };
        self.notify(transitions);
        state
    }

    /// Counts for the current generation.
    pub fn counts(&self) -> Counts {
        let mut transitions = Transitions::new();
        let counts = {
            let mut inner = self.inner.lock();
            self.current_state(&mut inner, Instant::now(), &mut transitions);
            inner.counts
        };
        self.notify(transitions);
        counts
    }

    /// Execute `f` under circuit breaker protection.
    ///
    /// Returns `CircuitOpen` without calling `f` when the circuit is open or
    /// the half-open trial budget is used up. Errors from `f` are returned
    /// unchanged. A panic inside `f` is recorded as a failure and resumed.
    pub async fn execute<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let generation = match self.before_call() {
            Ok(generation) => generation,
            Err(err) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                keel_log::debug!(
                    logger: self.config.logger,
                    "Circuit breaker '{}' rejected call",
                    self.config.name
                );
                return Err(err);
            }
        };

        let admission = Admission {
            breaker: self,
            generation,
            finished: false,
        };
        match AssertUnwindSafe(async { f().await }).catch_unwind().await {
            Ok(result) => {
                let success = match &result {
                    Ok(_) => true,
                    Err(err) => !self.is_failure(err),
                };
                admission.finish(success);
                result
            }
            Err(panic) => {
                admission.finish(false);
                std::panic::resume_unwind(panic)
            }
        }
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.transition(CircuitState::Closed);
    }

    /// Manually force the circuit open.
    pub fn force_open(&self) {
        self.transition(CircuitState::Open);
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            name: self.config.name.clone(),
            state: self.state(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            current: self.counts(),
        }
    }

    fn is_failure(&self, err: &Error) -> bool {
        match &self.config.is_failure {
            Some(predicate) => predicate(err),
            None => default_is_failure(err),
        }
    }

    fn transition(&self, to: CircuitState) {
        let mut transitions = Transitions::new();
        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            if inner.state == to {
                self.new_generation(&mut inner, now);
            } else {
                self.set_state(&mut inner, to, now, &mut transitions);
            }
        }
        self.notify(transitions);
    }

    fn before_call(&self) -> Result<u64> {
        let mut transitions = Transitions::new();
        let admitted = {
            let mut inner = self.inner.lock();
            let (state, generation) =
                self.current_state(&mut inner, Instant::now(), &mut transitions);

            match state {
                CircuitState::Open => Err(Error::CircuitOpen(self.config.name.clone())),
                CircuitState::HalfOpen
                    if inner.counts.requests >= self.config.half_open_limit() =>
                {
                    Err(Error::CircuitOpen(self.config.name.clone()))
                }
                _ => {
                    inner.counts.on_request();
                    Ok(generation)
                }
            }
        };
        self.notify(transitions);
        admitted
    }

    fn after_call(&self, before: u64, success: bool) {
        if success {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut transitions = Transitions::new();
        {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let (state, generation) = self.current_state(&mut inner, now, &mut transitions);

            // Outcomes from an earlier window or state do not count.
            if generation == before {
                if success {
                    self.on_success(&mut inner, state, now, &mut transitions);
                } else {
                    self.on_failure(&mut inner, state, now, &mut transitions);
                }
            }
        }
        self.notify(transitions);
    }

    /// Release the slot of a call whose future was dropped before it
    /// completed. The call counts as neither success nor failure.
    fn abandon(&self, before: u64) {
        let mut transitions = Transitions::new();
        {
            let mut inner = self.inner.lock();
            let (_, generation) = self.current_state(&mut inner, Instant::now(), &mut transitions);
            if generation == before {
                inner.counts.requests = inner.counts.requests.saturating_sub(1);
            }
        }
        keel_log::debug!(
            logger: self.config.logger,
            "Circuit breaker '{}' call abandoned before completion",
            self.config.name
        );
        self.notify(transitions);
    }

    fn on_success(
        &self,
        inner: &mut Inner,
        state: CircuitState,
        now: Instant,
        transitions: &mut Transitions,
    ) {
        match state {
            CircuitState::Closed => inner.counts.on_success(),
            CircuitState::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.config.half_open_limit() {
                    self.set_state(inner, CircuitState::Closed, now, transitions);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(
        &self,
        inner: &mut Inner,
        state: CircuitState,
        now: Instant,
        transitions: &mut Transitions,
    ) {
        match state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if self.ready_to_trip(&inner.counts) {
                    self.set_state(inner, CircuitState::Open, now, transitions);
                }
            }
            CircuitState::HalfOpen => {
                self.set_state(inner, CircuitState::Open, now, transitions);
            }
            CircuitState::Open => {}
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        match self.config.failure_ratio_threshold {
            Some(ratio) => {
                let min_requests = self.config.min_requests_for_ratio.unwrap_or(1).max(1);
                counts.requests >= min_requests
                    && f64::from(counts.total_failures) / f64::from(counts.requests) >= ratio
            }
            None => counts.total_failures >= self.config.failure_count_threshold.max(1),
        }
    }

    fn current_state(
        &self,
        inner: &mut Inner,
        now: Instant,
        transitions: &mut Transitions,
    ) -> (CircuitState, u64) {
        match inner.state {
            CircuitState::Closed => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.new_generation(inner, now);
                }
            }
            CircuitState::Open => {
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    self.set_state(inner, CircuitState::HalfOpen, now, transitions);
                }
            }
            CircuitState::HalfOpen => {
                // A trial call still running after a full break counts as failed.
                if inner.expiry.is_some_and(|expiry| expiry <= now) {
                    if inner.counts.in_flight() > 0 {
                        self.set_state(inner, CircuitState::Open, now, transitions);
                    } else {
                        inner.expiry = Some(now + self.config.break_duration);
                    }
                }
            }
        }
        (inner.state, inner.generation)
    }

    fn set_state(
        &self,
        inner: &mut Inner,
        to: CircuitState,
        now: Instant,
        transitions: &mut Transitions,
    ) {
        if inner.state == to {
            return;
        }
        let from = inner.state;
        inner.state = to;
        self.new_generation(inner, now);
        transitions.push((from, to));
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => (!self.config.sampling_interval.is_zero())
                .then(|| now + self.config.sampling_interval),
            CircuitState::Open => Some(now + self.config.break_duration),
            CircuitState::HalfOpen => Some(now + self.config.break_duration),
        };
    }

    /// Log and report transitions. Runs after the lock is released so
    /// callbacks may query the breaker.
    fn notify(&self, transitions: Transitions) {
        for (from, to) in transitions {
            let logger = &self.config.logger;
            match to {
                CircuitState::Open => keel_log::warn!(
                    logger: logger,
                    "Circuit breaker '{}' OPENED ({} -> {})",
                    self.config.name,
                    from,
                    to
                ),
                CircuitState::Closed => keel_log::info!(
                    logger: logger,
                    "Circuit breaker '{}' CLOSED ({} -> {})",
                    self.config.name,
                    from,
                    to
                ),
                CircuitState::HalfOpen => keel_log::debug!(
                    logger: logger,
                    "Circuit breaker '{}' probing ({} -> {})",
                    self.config.name,
                    from,
                    to
                ),
            }
            if let Some(callback) = &self.config.on_state_change {
                callback(&self.config.name, from, to);
            }
        }
    }
}

/// An admitted call. Dropped without [`finish`](Self::finish), it gives its
/// slot back so a cancelled trial call cannot wedge the half-open state.
struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    finished: bool,
}

impl Admission<'_> {
    fn finish(mut self, success: bool) {
        self.finished = true;
        self.breaker.after_call(self.generation, success);
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.abandon(self.generation);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

//! Circuit breaker guarding event bus I/O.
//!
//! Closed: calls pass; `failure_threshold` consecutive failures open it.
//! Open: calls are refused until `cooldown` has elapsed, then it goes
//! half-open. Half-open: one probe at a time; a failure reopens it,
//! `success_threshold` consecutive successes close it.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use tableside_core::config::BreakerConfig;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are refused.
    Open,
    /// A single probe call is allowed.
    HalfOpen,
}

impl CircuitState {
    /// Name used in logs and health output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Gauge value: 0 closed, 1 half-open, 2 open.
    pub fn gauge(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The breaker refused the call.
    #[error("circuit open, retry in {retry_in:?}")]
    Open {
        /// Time until a probe may be attempted.
        retry_in: Duration,
    },
    /// The call ran and failed.
    #[error(transparent)]
    Inner(E),
}

/// Counters exposed for health and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures while closed.
    pub consecutive_failures: u32,
    /// Consecutive successes while half-open.
    pub consecutive_successes: u32,
    /// Times the breaker has opened.
    pub times_opened: u64,
    /// Calls refused while open or while a probe was running.
    pub rejected: u64,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    times_opened: u64,
    rejected: u64,
}

/// Three-state circuit breaker. All transitions happen under one lock.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
                times_opened: 0,
                rejected: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` through the breaker.
    ///
    /// The outcome of `op` is recorded. If the returned future is dropped
    /// before `op` completes, the attempt counts as a failure.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = self.try_acquire().map_err(|retry_in| BreakerError::Open { retry_in })?;
        let result = op().await;
        permit.settled = true;
        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }

    fn try_acquire(&self) -> Result<Permit<'_>, Duration> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.cooldown());
                if elapsed < self.config.cooldown() {
                    inner.rejected += 1;
                    return Err(self.config.cooldown() - elapsed);
                }
                inner.state = CircuitState::HalfOpen;
                inner.consecutive_successes = 0;
                inner.probe_in_flight = true;
                info!(breaker = self.name, "Circuit half-open, probing");
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    inner.rejected += 1;
                    return Err(self.config.cooldown().min(Duration::from_secs(1)));
                }
                inner.probe_in_flight = true;
            }
        }
        Ok(Permit {
            breaker: self,
            settled: false,
        })
    }

    /// Record a successful bus operation.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                    info!(breaker = self.name, "Circuit closed");
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed bus operation.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            CircuitState::HalfOpen => self.open(&mut inner),
            CircuitState::Open => {}
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.probe_in_flight = false;
        inner.consecutive_successes = 0;
        inner.times_opened += 1;
        warn!(
            breaker = self.name,
            failures = inner.consecutive_failures,
            cooldown_secs = self.config.cooldown_seconds,
            "Circuit opened"
        );
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            times_opened: inner.times_opened,
            rejected: inner.rejected,
        }
    }
}

struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure();
        }
    }
}

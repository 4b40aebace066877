//! Circuit breaker guarding one remote resource.
//!
//! ```text
//!            failures >= threshold
//!   CLOSED ───────────────────────────▶ OPEN
//!     ▲                                  │ recovery wait elapsed
//!     │ successes >= success_threshold   ▼
//!     └─────────────────────────────  HALF_OPEN
//!                                        │ any failure
//!                                        └──────────▶ OPEN
//! ```
//!
//! The breaker only gates calls: the wrapped operation's error is always
//! returned to the caller unchanged.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument};

use super::backoff::ExponentialBackoff;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{BackoffMode, CircuitBreakerConfig};
use crate::error::JobError;

/// Failure count exponent cap for the exponential recovery wait.
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls fail fast.
    Open,
    /// Limited trial calls pass through.
    HalfOpen,
}

impl CircuitState {
    /// Upper-case label, as shown in stats output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    /// Resource name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures counted toward the threshold.
    pub failure_count: u32,
    /// Successes since the last failure or state change.
    pub success_count: u32,
    /// Every call to `execute`, including rejected ones.
    pub total_requests: u64,
    /// Calls rejected without running the operation.
    pub rejected_requests: u64,
    /// Milliseconds since the last recorded failure.
    pub last_failure_age_ms: Option<u64>,
    /// Milliseconds until an open circuit admits a trial.
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    trials_in_flight: u32,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            trials_in_flight: 0,
        }
    }
}

/// Circuit breaker for a single named resource.
///
/// State lives behind a `std::sync::Mutex` that is only held for the
/// bookkeeping around a call, never while the operation runs.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    recovery: ExponentialBackoff,
    clock: SharedClock,
    inner: Mutex<BreakerState>,
    total_requests: AtomicU64,
    rejected_requests: AtomicU64,
}

impl CircuitBreaker {
    /// Creates a closed breaker using the system clock.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    /// Creates a closed breaker reading time from `clock`.
    #[must_use]
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        let recovery = ExponentialBackoff::new(config.recovery_timeout(), config.max_backoff())
            .with_multiplier(config.backoff_multiplier);
        Self {
            name: name.into(),
            config,
            recovery,
            clock,
            inner: Mutex::new(BreakerState::closed()),
            total_requests: AtomicU64::new(0),
            rejected_requests: AtomicU64::new(0),
        }
    }

    /// Resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, without applying the OPEN → HALF_OPEN transition.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Runs `operation` if the circuit admits it.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::CircuitOpen`] without calling `operation` when the
    /// circuit is open (or half-open with all trial slots taken). Otherwise
    /// returns whatever `operation` returns.
    ///
    /// A [`JobError::Cancelled`] result never reached the resource and is
    /// not recorded; the trial slot, if any, is still released.
    #[instrument(level = "debug", skip_all, fields(breaker = %self.name))]
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, JobError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let permit = self.admit()?;
        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(JobError::Cancelled { id }) => {
                debug!(breaker = %self.name, id = %id, "operation cancelled locally, not recorded");
            }
            Err(error) => self.record_failure(error),
        }
        drop(permit);

        result
    }

    /// Forces the circuit open, as if the failure threshold had been reached now.
    pub fn trip(&self) {
        let mut inner = self.lock();
        inner.last_failure_at = Some(self.clock.now());
        inner.success_count = 0;
        if inner.state != CircuitState::Open {
            inner.state = CircuitState::Open;
            info!(breaker = %self.name, "circuit manually tripped");
        }
    }

    /// Forces the circuit closed and clears its counters.
    pub fn force_close(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        *inner = BreakerState::closed();
        if previous != CircuitState::Closed {
            info!(breaker = %self.name, from = %previous, "circuit manually closed");
        }
    }

    /// Returns a snapshot of counters and timing.
    #[must_use]
    pub fn stats(&self) -> CircuitStats {
        let inner = self.lock();
        let now = self.clock.now();
        let since_failure = inner
            .last_failure_at
            .map(|at| now.saturating_duration_since(at));
        let retry_after = match (inner.state, since_failure) {
            (CircuitState::Open, Some(elapsed)) => Some(
                self.recovery_wait(inner.failure_count)
                    .saturating_sub(elapsed),
            ),
            _ => None,
        };

        CircuitStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            rejected_requests: self.rejected_requests.load(Ordering::Relaxed),
            last_failure_age_ms: since_failure.map(millis),
            retry_after_ms: retry_after.map(millis),
        }
    }

    /// Wait before an open circuit admits a trial, for `failures` recorded failures.
    #[must_use]
    pub fn recovery_wait(&self, failures: u32) -> Duration {
        match self.config.backoff {
            BackoffMode::Fixed => self.config.recovery_timeout(),
            BackoffMode::Exponential => self
                .recovery
                .capped(failures.min(MAX_BACKOFF_EXPONENT)),
        }
    }

    fn admit(&self) -> Result<TrialPermit<'_>, JobError> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(TrialPermit::pass(self)),
            CircuitState::Open => {
                let wait = self.recovery_wait(inner.failure_count);
                let elapsed = inner
                    .last_failure_at
                    .map_or(Duration::MAX, |at| {
                        self.clock.now().saturating_duration_since(at)
                    });

                if elapsed >= wait {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.trials_in_flight = 1;
                    debug!(breaker = %self.name, "circuit half-open, admitting trial");
                    Ok(TrialPermit::trial(self))
                } else {
                    drop(inner);
                    Err(self.reject(wait.saturating_sub(elapsed)))
                }
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_max_calls {
                    inner.trials_in_flight += 1;
                    Ok(TrialPermit::trial(self))
                } else {
                    drop(inner);
                    Err(self.reject(Duration::ZERO))
                }
            }
        }
    }

    fn reject(&self, retry_in: Duration) -> JobError {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
        debug!(
            breaker = %self.name,
            retry_in_ms = millis(retry_in),
            "circuit open, rejecting call"
        );
        JobError::circuit_open(self.name.clone(), retry_in)
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        inner.success_count = inner.success_count.saturating_add(1);

        match inner.state {
            CircuitState::HalfOpen => {
                if inner.success_count >= self.config.success_threshold {
                    *inner = BreakerState {
                        last_failure_at: inner.last_failure_at,
                        ..BreakerState::closed()
                    };
                    info!(breaker = %self.name, "circuit closed after successful trials");
                }
            }
            CircuitState::Closed => {
                if self.config.reset_on_success {
                    inner.failure_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self, error: &JobError) {
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.success_count = 0;
        inner.last_failure_at = Some(self.clock.now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                info!(breaker = %self.name, error = %error, "trial failed, circuit re-opened");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                info!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    error = %error,
                    "circuit opened"
                );
            }
            CircuitState::Closed | CircuitState::Open => {
                debug!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    "failure recorded"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission of one call; releases its half-open trial slot on drop, including
/// when the caller abandons the call mid-flight.
struct TrialPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
}

impl<'a> TrialPermit<'a> {
    fn pass(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            trial: false,
        }
    }

    fn trial(breaker: &'a CircuitBreaker) -> Self {
        Self {
            breaker,
            trial: true,
        }
    }
}

impl Drop for TrialPermit<'_> {
    fn drop(&mut self) {
        if self.trial {
            let mut inner = self.breaker.lock();
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

//! Bounded-concurrency connection pool with priority scheduling and retries.
//!
//! # Overview
//!
//! [`ConnectionPool::execute`] queues an operation, then waits for a slot.
//! At most `max_connections` operations hold a slot at once; when a slot
//! frees up, the highest-priority queued operation gets it (FIFO among equal
//! priorities). Work that is already running is never preempted.
//!
//! A dispatched operation is attempted up to `retry_attempts + 1` times.
//! Each attempt races a per-attempt timeout, and retryable failures wait an
//! exponential backoff before the next attempt.
//!
//! # Example
//!
//! ```
//! use jobdl_core::config::PoolConfig;
//! use jobdl_core::pool::ConnectionPool;
//! use jobdl_core::JobError;
//!
//! # async fn example() -> Result<(), JobError> {
//! let pool = ConnectionPool::new(&PoolConfig::default());
//! let answer = pool.execute(|| async { Ok::<_, JobError>(42) }, 0).await?;
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

mod queue;

use std::collections::BinaryHeap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use self::queue::QueuedOperation;
use crate::config::PoolConfig;
use crate::error::JobError;
use crate::resilience::ExponentialBackoff;

/// How often [`ConnectionPool::drain`] re-checks for idleness.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Snapshot of pool occupancy and counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Operations holding a slot.
    pub active: usize,
    /// Operations waiting for a slot.
    pub queued: usize,
    /// Slot limit.
    pub max_connections: usize,
    /// Operations that eventually succeeded.
    pub completed: u64,
    /// Operations that failed after their last attempt.
    pub failed: u64,
    /// Retries scheduled (attempts after the first).
    pub retried: u64,
    /// Queued operations removed by [`ConnectionPool::clear_queue`].
    pub cancelled: u64,
    /// Attempts that hit the per-attempt timeout.
    pub timed_out: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

impl PoolCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct PoolState {
    queue: BinaryHeap<QueuedOperation>,
    active: usize,
}

#[derive(Debug)]
struct PoolShared {
    max_connections: usize,
    timeout: Duration,
    retry_attempts: u32,
    backoff: ExponentialBackoff,
    state: Mutex<PoolState>,
    next_seq: AtomicU64,
    counters: PoolCounters,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands free slots to the highest-priority queued operations.
fn dispatch(shared: &Arc<PoolShared>) {
    let mut state = shared.lock();

    while state.active < shared.max_connections {
        let Some(next) = state.queue.pop() else {
            break;
        };
        if next.is_abandoned() {
            debug!(id = %next.id, "skipping abandoned operation");
            continue;
        }

        state.active += 1;
        debug!(
            id = %next.id,
            priority = next.priority,
            waited_ms = u64::try_from(next.enqueued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            active = state.active,
            "dispatching operation"
        );

        let slot = ActiveSlot {
            shared: Arc::clone(shared),
            armed: true,
        };
        if let Err(Ok(mut slot)) = next.dispatch.send(Ok(slot)) {
            // Receiver went away after the check; give the slot back in place.
            slot.armed = false;
            state.active -= 1;
        }
    }
}

/// An occupied pool slot; frees it and re-triggers dispatch on drop.
#[derive(Debug)]
pub(crate) struct ActiveSlot {
    shared: Arc<PoolShared>,
    armed: bool,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut state = self.shared.lock();
            state.active = state.active.saturating_sub(1);
        }
        dispatch(&self.shared);
    }
}

/// Bounded-concurrency executor with a priority queue and retry/backoff.
///
/// Cloning is cheap and clones share the same slots and queue.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Creates a pool from configuration.
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        let backoff = ExponentialBackoff::new(config.retry_base_delay(), config.retry_max_delay())
            .with_jitter(config.retry_jitter());

        debug!(
            max_connections = config.max_connections,
            timeout_ms = config.timeout_ms,
            retry_attempts = config.retry_attempts,
            "creating connection pool"
        );

        Self {
            shared: Arc::new(PoolShared {
                max_connections: config.max_connections.max(1),
                timeout: config.timeout(),
                retry_attempts: config.retry_attempts,
                backoff,
                state: Mutex::new(PoolState::default()),
                next_seq: AtomicU64::new(1),
                counters: PoolCounters::default(),
            }),
        }
    }

    /// Slot limit.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.shared.max_connections
    }

    /// Runs `operation` once a slot is free, retrying retryable failures.
    ///
    /// `operation` is called once per attempt. Higher `priority` values are
    /// dispatched first.
    ///
    /// # Errors
    ///
    /// - [`JobError::Cancelled`] if the entry was removed by [`clear_queue`](Self::clear_queue)
    /// - [`JobError::ExhaustedRetries`] once every attempt failed with a retryable error
    /// - the operation's own error, unchanged, for non-retryable failures
    #[instrument(level = "debug", skip_all, fields(priority = priority))]
    pub async fn execute<T, F, Fut>(&self, operation: F, priority: i32) -> Result<T, JobError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let (dispatch_tx, dispatch_rx) = oneshot::channel();
        let seq = self.shared.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = QueuedOperation::new(seq, priority, dispatch_tx);
        let id = entry.id.clone();

        {
            let mut state = self.shared.lock();
            state.queue.push(entry);
            debug!(id = %id, queued = state.queue.len(), "operation queued");
        }

        // Let submissions from the same tick reach the queue before choosing.
        tokio::task::yield_now().await;
        dispatch(&self.shared);

        let slot = match dispatch_rx.await {
            Ok(Ok(slot)) => slot,
            Ok(Err(error)) => return Err(error),
            Err(_) => return Err(JobError::cancelled(id)),
        };

        let result = self.run_attempts(&id, operation).await;
        drop(slot);
        result
    }

    async fn run_attempts<T, F, Fut>(&self, id: &str, mut operation: F) -> Result<T, JobError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, JobError>>,
    {
        let shared = &self.shared;
        let max_attempts = shared.retry_attempts.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(shared.timeout, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    PoolCounters::bump(&shared.counters.timed_out);
                    Err(JobError::timeout(shared.timeout))
                }
            };

            let error = match outcome {
                Ok(value) => {
                    PoolCounters::bump(&shared.counters.completed);
                    debug!(id, attempt, "operation completed");
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                PoolCounters::bump(&shared.counters.failed);
                debug!(id, attempt, error = %error, "operation failed, not retryable");
                return Err(error);
            }

            if attempt >= max_attempts {
                PoolCounters::bump(&shared.counters.failed);
                warn!(id, attempts = attempt, error = %error, "operation failed, retries exhausted");
                return Err(JobError::exhausted(attempt, error));
            }

            let delay = shared.backoff.delay(attempt - 1);
            PoolCounters::bump(&shared.counters.retried);
            warn!(
                id,
                attempt,
                next_attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Waits until no operation is running or queued.
    pub async fn drain(&self) {
        loop {
            {
                let mut state = self.shared.lock();
                state.queue.retain(|entry| !entry.is_abandoned());
                if state.active == 0 && state.queue.is_empty() {
                    break;
                }
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        debug!("connection pool drained");
    }

    /// Fails every queued operation with [`JobError::Cancelled`].
    ///
    /// Running operations are not affected. Returns the number cancelled.
    pub fn clear_queue(&self) -> usize {
        let cleared: Vec<QueuedOperation> = {
            let mut state = self.shared.lock();
            state.queue.drain().collect()
        };

        let mut cancelled = 0;
        for entry in cleared {
            let id = entry.id.clone();
            if entry.dispatch.send(Err(JobError::cancelled(id))).is_ok() {
                cancelled += 1;
                PoolCounters::bump(&self.shared.counters.cancelled);
            }
        }

        if cancelled > 0 {
            info!(cancelled, "cleared connection pool queue");
        }
        cancelled
    }

    /// Returns occupancy and counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let (active, queued) = {
            let state = self.shared.lock();
            (state.active, state.queue.len())
        };
        let counters = &self.shared.counters;

        PoolStats {
            active,
            queued,
            max_connections: self.shared.max_connections,
            completed: counters.completed.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            retried: counters.retried.load(Ordering::SeqCst),
            cancelled: counters.cancelled.load(Ordering::SeqCst),
            timed_out: counters.timed_out.load(Ordering::SeqCst),
        }
    }
}

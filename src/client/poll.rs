//! Wait-for-completion state machine.
//!
//! [`StatusPoller`] holds no timers and performs no IO. The driver asks it
//! for the next step at the current instant, performs that step (read the
//! status or sleep), and reports the outcome back.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::api::{Job, JobStatus};
use crate::config::PollConfig;
use crate::error::JobError;

/// What the driver should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// Read the job's status now.
    Check,
    /// Sleep this long, then ask again.
    Sleep(Duration),
    /// The job reached a terminal state.
    Finished(Job),
    /// The deadline passed first.
    TimedOut {
        /// Time since polling started.
        waited: Duration,
        /// Last status read, if any succeeded.
        last_status: Option<JobStatus>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Checking,
    Waiting { until: Instant },
    Finished(Job),
}

/// Polling state for one job.
#[derive(Debug, Clone)]
pub struct StatusPoller {
    job_id: String,
    started_at: Instant,
    interval: Duration,
    slowdown_after: Duration,
    max_interval: Duration,
    timeout: Duration,
    last_status: Option<JobStatus>,
    checks: u32,
    phase: Phase,
}

impl StatusPoller {
    /// Starts polling at `now`; the first step is an immediate check.
    #[must_use]
    pub fn new(job_id: impl Into<String>, config: &PollConfig, now: Instant) -> Self {
        let interval = config.initial_interval();
        Self {
            job_id: job_id.into(),
            started_at: now,
            interval,
            slowdown_after: config.slowdown_after(),
            max_interval: config.max_interval().max(interval),
            timeout: config.timeout(),
            last_status: None,
            checks: 0,
            phase: Phase::Checking,
        }
    }

    /// Job being polled.
    #[must_use]
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Last status successfully read.
    #[must_use]
    pub fn last_status(&self) -> Option<JobStatus> {
        self.last_status
    }

    /// Delay that will follow the next non-terminal read.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Status reads reported so far, successful or not.
    #[must_use]
    pub fn checks(&self) -> u32 {
        self.checks
    }

    /// Decides the next step at `now`.
    pub fn next_step(&mut self, now: Instant) -> PollStep {
        let waited = now.saturating_duration_since(self.started_at);

        match &self.phase {
            Phase::Finished(job) => PollStep::Finished(job.clone()),
            Phase::Checking => PollStep::Check,
            Phase::Waiting { .. } if waited >= self.timeout => PollStep::TimedOut {
                waited,
                last_status: self.last_status,
            },
            Phase::Waiting { until } => {
                let until = *until;
                if now >= until {
                    self.phase = Phase::Checking;
                    PollStep::Check
                } else {
                    let to_deadline = self.timeout - waited;
                    PollStep::Sleep((until - now).min(to_deadline))
                }
            }
        }
    }

    /// Records a successful status read.
    pub fn record_status(&mut self, job: Job, now: Instant) {
        self.checks += 1;
        self.last_status = Some(job.status);

        if job.status.is_terminal() {
            debug!(job_id = %self.job_id, status = %job.status, checks = self.checks, "job reached terminal state");
            self.phase = Phase::Finished(job);
            return;
        }

        self.schedule_next(now);
    }

    /// Records a failed status read.
    ///
    /// # Errors
    ///
    /// Returns the error back when polling should stop: a permanent failure
    /// other than an open circuit. Transient failures are logged and polling
    /// continues on the normal schedule.
    pub fn record_error(&mut self, error: JobError, now: Instant) -> Result<(), JobError> {
        self.checks += 1;

        let keep_polling =
            error.is_retryable() || matches!(error.root(), JobError::CircuitOpen { .. });
        if !keep_polling {
            return Err(error);
        }

        warn!(job_id = %self.job_id, error = %error, "status read failed, continuing to poll");
        self.schedule_next(now);
        Ok(())
    }

    fn schedule_next(&mut self, now: Instant) {
        self.phase = Phase::Waiting {
            until: now + self.interval,
        };

        let waited = now.saturating_duration_since(self.started_at);
        if waited > self.slowdown_after && self.interval < self.max_interval {
            self.interval = (self.interval * 2).min(self.max_interval);
            debug!(job_id = %self.job_id, interval_ms = self.interval.as_millis(), "slowing status polling");
        }
    }
}

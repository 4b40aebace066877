//! Error types shared by the resilience layer and the job API clients.
//!
//! Every operation in this crate fails with a [`JobError`]. The enum covers
//! both transport failures reported by a base client (network, HTTP status,
//! decode) and the failures the resilience layer itself produces (timeouts,
//! open circuits, cancelled queue entries, exhausted retries).
//!
//! `JobError` is `Clone`: deduplicated callers share one underlying call, so
//! every one of them must receive the same error value. Non-cloneable sources
//! are therefore held behind an [`Arc`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::instrument;

use crate::api::JobStatus;

/// Maximum number of response body bytes kept in an [`JobError::HttpStatus`].
const MAX_ERROR_BODY_LEN: usize = 512;

/// Errors produced by job API operations and the resilience layer.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// Network-level error (DNS resolution, connection refused, reset, etc.)
    #[error("network error during {operation}: {source}")]
    Network {
        /// Logical operation that failed (e.g. `get_status`).
        operation: String,
        /// The underlying transport error.
        #[source]
        source: Arc<reqwest::Error>,
    },

    /// The remote API answered with a non-success status.
    #[error("HTTP {status} during {operation}")]
    HttpStatus {
        /// Logical operation that failed.
        operation: String,
        /// The HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: Option<String>,
    },

    /// The response body could not be decoded.
    #[error("invalid response during {operation}: {source}")]
    Decode {
        /// Logical operation that failed.
        operation: String,
        /// The underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The request could not be built (bad job id, bad base URL).
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A single attempt did not settle before its deadline.
    #[error("operation timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// The per-attempt deadline that elapsed.
        timeout: Duration,
    },

    /// The circuit breaker for `resource` is open and rejected the call.
    #[error("circuit open for {resource}, retry in {}ms", .retry_in.as_millis())]
    CircuitOpen {
        /// Breaker resource name.
        resource: String,
        /// Time left until the breaker lets a trial through.
        retry_in: Duration,
    },

    /// A queued operation was removed before it was dispatched.
    #[error("operation {id} cancelled before dispatch")]
    Cancelled {
        /// Pool-assigned operation id.
        id: String,
    },

    /// The background task running a shared request panicked or was aborted.
    #[error("request {key} did not complete: {message}")]
    TaskFailed {
        /// Operation key of the shared request.
        key: String,
        /// Why the task ended.
        message: String,
    },

    /// Every attempt failed; wraps the last observed error.
    #[error("operation failed after {attempts} attempts: {last}")]
    ExhaustedRetries {
        /// Total attempts made (initial + retries).
        attempts: u32,
        /// The error returned by the final attempt.
        #[source]
        last: Box<JobError>,
    },

    /// A job did not reach a terminal state before the wait deadline.
    #[error(
        "timed out after {}s waiting for job {job_id} (last status: {})",
        .waited.as_secs(),
        status_label(.last_status)
    )]
    WaitTimeout {
        /// The job being waited on.
        job_id: String,
        /// How long the wait lasted.
        waited: Duration,
        /// The last status successfully read, if any.
        last_status: Option<JobStatus>,
    },
}

impl JobError {
    /// Creates a network error from a reqwest error.
    pub fn network(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            operation: operation.into(),
            source: Arc::new(source),
        }
    }

    /// Creates an HTTP status error without a body.
    pub fn http_status(operation: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            operation: operation.into(),
            status,
            body: None,
        }
    }

    /// Creates an HTTP status error, keeping at most 512 bytes of the body.
    pub fn http_status_with_body(
        operation: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        let mut body = body.into();
        if body.len() > MAX_ERROR_BODY_LEN {
            let mut cut = MAX_ERROR_BODY_LEN;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Self::HttpStatus {
            operation: operation.into(),
            status,
            body: (!body.is_empty()).then_some(body),
        }
    }

    /// Creates a decode error from a serde_json error.
    pub fn decode(operation: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            operation: operation.into(),
            source: Arc::new(source),
        }
    }

    /// Creates an error for a shared request whose task ended abnormally.
    pub fn task_failed(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskFailed {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a per-attempt timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Creates a circuit-open rejection.
    pub fn circuit_open(resource: impl Into<String>, retry_in: Duration) -> Self {
        Self::CircuitOpen {
            resource: resource.into(),
            retry_in,
        }
    }

    /// Creates a cancellation error for a queued operation.
    pub fn cancelled(id: impl Into<String>) -> Self {
        Self::Cancelled { id: id.into() }
    }

    /// Wraps the final attempt's error after retries ran out.
    pub fn exhausted(attempts: u32, last: JobError) -> Self {
        Self::ExhaustedRetries {
            attempts,
            last: Box::new(last),
        }
    }

    /// Creates a wait timeout carrying the last known status.
    pub fn wait_timeout(
        job_id: impl Into<String>,
        waited: Duration,
        last_status: Option<JobStatus>,
    ) -> Self {
        Self::WaitTimeout {
            job_id: job_id.into(),
            waited,
            last_status,
        }
    }

    /// Returns whether another attempt could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        classify_error(self) != FailureType::Permanent
    }

    /// Returns the innermost error, unwrapping [`JobError::ExhaustedRetries`].
    #[must_use]
    pub fn root(&self) -> &JobError {
        match self {
            Self::ExhaustedRetries { last, .. } => last.root(),
            other => other,
        }
    }
}

fn status_label(status: &Option<JobStatus>) -> &'static str {
    status.as_ref().map_or("unknown", JobStatus::as_str)
}

/// Classification of failures for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network errors, attempt timeouts, 5xx responses.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, undecodable bodies, invalid job ids.
    Permanent,

    /// Server rate limiting (HTTP 429). Retried with backoff.
    RateLimited,
}

/// Classifies an error into a failure type for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | Network | Transient |
/// | Timeout | Transient |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | other HTTP | Permanent |
/// | Decode, InvalidRequest | Permanent |
/// | CircuitOpen, Cancelled, TaskFailed, WaitTimeout | Permanent |
/// | ExhaustedRetries | classification of the wrapped error |
#[instrument(level = "trace")]
pub fn classify_error(error: &JobError) -> FailureType {
    match error {
        JobError::Network { .. } | JobError::Timeout { .. } => FailureType::Transient,
        JobError::HttpStatus { status, .. } => classify_http_status(*status),
        JobError::ExhaustedRetries { last, .. } => classify_error(last),
        JobError::Decode { .. }
        | JobError::InvalidRequest { .. }
        | JobError::CircuitOpen { .. }
        | JobError::Cancelled { .. }
        | JobError::TaskFailed { .. }
        | JobError::WaitTimeout { .. } => FailureType::Permanent,
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

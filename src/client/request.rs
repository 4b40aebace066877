//! Request interface of the optimized client.

use crate::api::{CreateJobRequest, Job};
use crate::error::JobError;

/// Pool priority of job creation.
pub const CREATE_PRIORITY: i32 = 10;
/// Pool priority of cancellation.
pub const CANCEL_PRIORITY: i32 = 10;
/// Pool priority of result downloads.
pub const RESULT_PRIORITY: i32 = 5;
/// Pool priority of status reads.
pub const STATUS_PRIORITY: i32 = 0;

/// One logical operation against the job API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    /// Start a new job.
    Create(CreateJobRequest),
    /// Read a job's state.
    Status {
        /// Job id.
        job_id: String,
    },
    /// Cancel a job.
    Cancel {
        /// Job id.
        job_id: String,
    },
    /// Download a completed job's result.
    FetchResult {
        /// Job id.
        job_id: String,
    },
}

impl JobRequest {
    /// Status read for `job_id`.
    pub fn status(job_id: impl Into<String>) -> Self {
        Self::Status {
            job_id: job_id.into(),
        }
    }

    /// Cancellation of `job_id`.
    pub fn cancel(job_id: impl Into<String>) -> Self {
        Self::Cancel {
            job_id: job_id.into(),
        }
    }

    /// Result download for `job_id`.
    pub fn fetch_result(job_id: impl Into<String>) -> Self {
        Self::FetchResult {
            job_id: job_id.into(),
        }
    }

    /// Operation name used in logs and errors.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Create(_) => "create_job",
            Self::Status { .. } => "get_status",
            Self::Cancel { .. } => "cancel_job",
            Self::FetchResult { .. } => "fetch_result",
        }
    }

    /// Circuit breaker resource guarding this operation.
    #[must_use]
    pub fn resource(&self) -> &'static str {
        match self {
            Self::Create(_) => "jobs.create",
            Self::Status { .. } => "jobs.status",
            Self::Cancel { .. } => "jobs.cancel",
            Self::FetchResult { .. } => "jobs.result",
        }
    }

    /// Pool priority used when the caller gives none.
    #[must_use]
    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Create(_) => CREATE_PRIORITY,
            Self::Status { .. } => STATUS_PRIORITY,
            Self::Cancel { .. } => CANCEL_PRIORITY,
            Self::FetchResult { .. } => RESULT_PRIORITY,
        }
    }

    /// Job the request targets, if it targets an existing one.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Create(_) => None,
            Self::Status { job_id } | Self::Cancel { job_id } | Self::FetchResult { job_id } => {
                Some(job_id)
            }
        }
    }

    /// Key identifying identical in-flight requests.
    ///
    /// Arguments are rendered with `Debug` so quoting keeps keys unambiguous
    /// even when values contain separators.
    #[must_use]
    pub fn operation_key(&self) -> String {
        match self {
            Self::Create(request) => format!(
                "{}:{:?}",
                self.operation(),
                (&request.account, &request.target, &request.save_location)
            ),
            Self::Status { job_id } | Self::Cancel { job_id } | Self::FetchResult { job_id } => {
                format!("{}:{job_id:?}", self.operation())
            }
        }
    }
}

/// Result of a [`JobRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResponse {
    /// Job record from create, status and cancel.
    Job(Job),
    /// Result bytes from fetch-result.
    Result(Vec<u8>),
}

impl JobResponse {
    /// Returns the job record.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidRequest`] for a result payload.
    pub fn into_job(self) -> Result<Job, JobError> {
        match self {
            Self::Job(job) => Ok(job),
            Self::Result(_) => Err(JobError::invalid_request(
                "expected a job record, got result bytes",
            )),
        }
    }

    /// Returns the result bytes.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidRequest`] for a job record.
    pub fn into_bytes(self) -> Result<Vec<u8>, JobError> {
        match self {
            Self::Result(bytes) => Ok(bytes),
            Self::Job(job) => Err(JobError::invalid_request(format!(
                "expected result bytes, got job record {}",
                job.id
            ))),
        }
    }
}

/// Cache key of a job's status entry.
#[must_use]
pub fn status_cache_key(job_id: &str) -> String {
    format!("{}status", job_cache_prefix(job_id))
}

/// Prefix shared by every cache entry of one job.
#[must_use]
pub fn job_cache_prefix(job_id: &str) -> String {
    format!("job:{job_id}:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priorities() {
        let create = JobRequest::Create(CreateJobRequest::new("acme", "video-1"));
        assert_eq!(create.default_priority(), 10);
        assert_eq!(JobRequest::cancel("j1").default_priority(), 10);
        assert_eq!(JobRequest::fetch_result("j1").default_priority(), 5);
        assert_eq!(JobRequest::status("j1").default_priority(), 0);
    }

    #[test]
    fn test_operation_keys_distinguish_arguments() {
        assert_eq!(JobRequest::status("j1").operation_key(), "get_status:\"j1\"");
        assert_ne!(
            JobRequest::status("j1").operation_key(),
            JobRequest::cancel("j1").operation_key()
        );

        let a = JobRequest::Create(CreateJobRequest::new("a:b", "c"));
        let b = JobRequest::Create(CreateJobRequest::new("a", "b:c"));
        assert_ne!(a.operation_key(), b.operation_key());
    }

    #[test]
    fn test_status_cache_key_layout() {
        assert_eq!(status_cache_key("42"), "job:42:status");
        assert!(status_cache_key("42").starts_with(&job_cache_prefix("42")));
        assert!(!status_cache_key("421").contains(&job_cache_prefix("42")));
    }
}

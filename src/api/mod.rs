//! Job API data model and the base-client seam.
//!
//! [`JobApi`] is the set of remote operations the resilience layer wraps.
//! [`HttpJobClient`] implements it over HTTP; tests substitute scripted fakes.

mod http;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use http::HttpJobClient;

use crate::error::JobError;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, not started.
    Pending,
    /// Transfer in progress.
    Downloading,
    /// Finished; the result can be fetched.
    Completed,
    /// Finished with an error.
    Failed,
    /// Stopped on request.
    Cancelled,
    /// A status this client does not know about.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Returns the wire representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the job will not change state again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "unknown" => Ok(Self::Unknown),
            other => Err(JobError::invalid_request(format!(
                "unrecognized job status `{other}`"
            ))),
        }
    }
}

/// A server-tracked download job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Opaque job id.
    pub id: String,
    /// Current status.
    pub status: JobStatus,
    /// Account the download runs under.
    pub account: String,
    /// What is being downloaded.
    pub target: String,
    /// Server-side save location, if one was requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_location: Option<String>,
    /// RFC 3339 start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// RFC 3339 finish time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    /// Failure message for failed jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of a create-job call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    /// Account the download runs under.
    pub account: String,
    /// What to download.
    pub target: String,
    /// Optional server-side save location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_location: Option<String>,
}

impl CreateJobRequest {
    /// Creates a request without a save location.
    pub fn new(account: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            target: target.into(),
            save_location: None,
        }
    }

    /// Sets the save location.
    #[must_use]
    pub fn with_save_location(mut self, location: impl Into<String>) -> Self {
        self.save_location = Some(location.into());
        self
    }

    /// Rejects requests with blank fields.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidRequest`] naming the blank field.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.account.trim().is_empty() {
            return Err(JobError::invalid_request("account must not be empty"));
        }
        if self.target.trim().is_empty() {
            return Err(JobError::invalid_request("target must not be empty"));
        }
        Ok(())
    }
}

/// Base remote operations of the job API.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Starts a new job.
    async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, JobError>;

    /// Reads a job's current state.
    async fn get_status(&self, job_id: &str) -> Result<Job, JobError>;

    /// Requests cancellation and returns the updated job.
    async fn cancel_job(&self, job_id: &str) -> Result<Job, JobError>;

    /// Downloads a completed job's result.
    async fn fetch_result(&self, job_id: &str) -> Result<Vec<u8>, JobError>;
}

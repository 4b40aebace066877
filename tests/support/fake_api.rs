//! Scripted in-memory `JobApi` with per-operation call counters.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use jobdl_core::{CreateJobRequest, Job, JobApi, JobError, JobStatus};

pub fn job(id: &str, status: JobStatus) -> Job {
    Job {
        id: id.to_string(),
        status,
        account: "acme".to_string(),
        target: "video-1".to_string(),
        save_location: None,
        started_at: None,
        finished_at: None,
        error: None,
    }
}

/// Status reads pop scripted outcomes; once the script runs out they return
/// `fallback_status`. Every call sleeps `delay` first; status reads sleep
/// `status_delay` instead when it is set.
#[derive(Debug)]
pub struct FakeJobApi {
    statuses: Mutex<VecDeque<Result<Job, JobError>>>,
    fallback_status: JobStatus,
    result: Vec<u8>,
    delay: Duration,
    status_delay: Option<Duration>,
    create_calls: AtomicUsize,
    status_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    result_calls: AtomicUsize,
}

impl FakeJobApi {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(VecDeque::new()),
            fallback_status: JobStatus::Downloading,
            result: b"payload".to_vec(),
            delay: Duration::ZERO,
            status_delay: None,
            create_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = Some(delay);
        self
    }

    pub fn with_fallback_status(mut self, status: JobStatus) -> Self {
        self.fallback_status = status;
        self
    }

    pub fn with_statuses(self, script: Vec<Result<Job, JobError>>) -> Self {
        self.statuses.lock().unwrap().extend(script);
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        sleep_for(self.delay).await;
    }
}

async fn sleep_for(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl JobApi for FakeJobApi {
    async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, JobError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(Job {
            account: request.account.clone(),
            target: request.target.clone(),
            save_location: request.save_location.clone(),
            ..job("job-1", JobStatus::Pending)
        })
    }

    async fn get_status(&self, job_id: &str) -> Result<Job, JobError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        sleep_for(self.status_delay.unwrap_or(self.delay)).await;
        let scripted = self.statuses.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(job(job_id, self.fallback_status)))
    }

    async fn cancel_job(&self, job_id: &str) -> Result<Job, JobError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(job(job_id, JobStatus::Cancelled))
    }

    async fn fetch_result(&self, _job_id: &str) -> Result<Vec<u8>, JobError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.result.clone())
    }
}

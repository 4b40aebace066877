//! Optimized job client: cache, circuit breakers, pool and request
//! deduplication around any [`JobApi`].
//!
//! # Request path
//!
//! ```text
//! submit(request)
//!   ├─ cancel: invalidate cached entries of the job
//!   ├─ status: cache hit? return it
//!   ├─ identical request in flight? await the same result
//!   └─ spawn: breaker[resource].execute(pool.execute(api call, priority))
//!        └─ on success: write job records through to the status cache
//! ```
//!
//! Every layer can be switched off in [`ClientConfig`]; a disabled layer is
//! bypassed entirely.
//!
//! # Example
//!
//! ```no_run
//! use jobdl_core::api::CreateJobRequest;
//! use jobdl_core::client::OptimizedClient;
//! use jobdl_core::config::ClientConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OptimizedClient::from_config(&ClientConfig::default())?;
//! let job = client.create_job(CreateJobRequest::new("acme", "video-1")).await?;
//! let done = client.wait_for_completion(&job.id).await?;
//! let bytes = client.fetch_result(&done.id).await?;
//! println!("{} bytes", bytes.len());
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod poll;
mod request;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

pub use poll::{PollStep, StatusPoller};
pub use request::{
    CANCEL_PRIORITY, CREATE_PRIORITY, JobRequest, JobResponse, RESULT_PRIORITY, STATUS_PRIORITY,
    job_cache_prefix, status_cache_key,
};

use crate::api::{CreateJobRequest, HttpJobClient, Job, JobApi};
use crate::cache::{CacheStats, ResponseCache, spawn_cleanup_task};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{CacheConfig, ClientConfig, PollConfig};
use crate::error::JobError;
use crate::pool::{ConnectionPool, PoolStats};
use crate::resilience::{CircuitBreakerRegistry, CircuitStats};

type SharedResponse = Shared<BoxFuture<'static, Result<JobResponse, JobError>>>;

/// Aggregated snapshot of every layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStats {
    /// Cache counters; `None` when caching is disabled.
    pub cache: Option<CacheStats>,
    /// One entry per breaker created so far, sorted by name.
    pub circuits: Vec<CircuitStats>,
    /// Pool counters; `None` when the pool is disabled.
    pub pool: Option<PoolStats>,
    /// Distinct requests currently in flight.
    pub in_flight: usize,
}

struct ClientInner {
    api: Arc<dyn JobApi>,
    cache: Option<Arc<Mutex<ResponseCache<Job>>>>,
    cache_config: CacheConfig,
    breakers: Option<CircuitBreakerRegistry>,
    pool: Option<ConnectionPool>,
    polling: PollConfig,
    clock: SharedClock,
    in_flight: Mutex<HashMap<String, SharedResponse>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Job client with caching, circuit breaking, pooling and deduplication.
///
/// Cloning is cheap; clones share every layer.
#[derive(Clone)]
pub struct OptimizedClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for OptimizedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizedClient")
            .field("cache", &self.inner.cache.is_some())
            .field("circuit_breaker", &self.inner.breakers.is_some())
            .field("pool", &self.inner.pool.is_some())
            .finish_non_exhaustive()
    }
}

impl OptimizedClient {
    /// Builds an [`HttpJobClient`] from `config` and wraps it.
    ///
    /// # Errors
    ///
    /// Returns the error of [`HttpJobClient::new`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, JobError> {
        let api = HttpJobClient::new(config)?;
        Ok(Self::new(Arc::new(api), config))
    }

    /// Wraps `api` with the layers enabled in `config`.
    #[must_use]
    pub fn new(api: Arc<dyn JobApi>, config: &ClientConfig) -> Self {
        Self::with_clock(api, config, Arc::new(SystemClock))
    }

    /// Wraps `api`, reading time from `clock`.
    #[must_use]
    pub fn with_clock(api: Arc<dyn JobApi>, config: &ClientConfig, clock: SharedClock) -> Self {
        let cache = config.cache.enabled.then(|| {
            Arc::new(Mutex::new(ResponseCache::with_clock(
                config.cache.max_size,
                config.cache.ttl(),
                Arc::clone(&clock),
            )))
        });
        let breakers = config.circuit_breaker.enabled.then(|| {
            CircuitBreakerRegistry::with_clock(config.circuit_breaker.clone(), Arc::clone(&clock))
        });
        let pool = config
            .pool
            .enabled
            .then(|| ConnectionPool::new(&config.pool));

        debug!(
            cache = cache.is_some(),
            circuit_breaker = breakers.is_some(),
            pool = pool.is_some(),
            "optimized client ready"
        );

        Self {
            inner: Arc::new(ClientInner {
                api,
                cache,
                cache_config: config.cache.clone(),
                breakers,
                pool,
                polling: config.polling.clone(),
                clock,
                in_flight: Mutex::new(HashMap::new()),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Runs `request`, with `priority` overriding the operation's default.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying call, or a resilience error
    /// ([`JobError::CircuitOpen`], [`JobError::Timeout`],
    /// [`JobError::ExhaustedRetries`], [`JobError::Cancelled`]).
    /// [`JobError::TaskFailed`] if the task running the call panicked.
    #[instrument(skip(self, request), fields(operation = request.operation(), job_id = request.job_id()))]
    pub async fn submit(
        &self,
        request: JobRequest,
        priority: Option<i32>,
    ) -> Result<JobResponse, JobError> {
        if let JobRequest::Cancel { job_id } = &request {
            let removed = self.invalidate_job(job_id);
            debug!(job_id = %job_id, removed, "invalidated cache before cancel");
        }

        if let JobRequest::Status { job_id } = &request
            && let Some(job) = self.cached_status(job_id)
        {
            debug!(job_id = %job_id, "status served from cache");
            return Ok(JobResponse::Job(job));
        }

        let priority = priority.unwrap_or_else(|| request.default_priority());
        self.dedup(request, priority).await
    }

    /// Creates a job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::InvalidRequest`] for blank fields, otherwise the
    /// errors of [`submit`](Self::submit).
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<Job, JobError> {
        request.validate()?;
        self.submit(JobRequest::Create(request), None)
            .await?
            .into_job()
    }

    /// Reads a job's status, from cache when fresh.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn get_status(&self, job_id: &str) -> Result<Job, JobError> {
        self.submit(JobRequest::status(job_id), None)
            .await?
            .into_job()
    }

    /// Cancels a job.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn cancel_job(&self, job_id: &str) -> Result<Job, JobError> {
        self.submit(JobRequest::cancel(job_id), None)
            .await?
            .into_job()
    }

    /// Downloads a job's result.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub async fn fetch_result(&self, job_id: &str) -> Result<Vec<u8>, JobError> {
        self.submit(JobRequest::fetch_result(job_id), None)
            .await?
            .into_bytes()
    }

    /// Polls until the job reaches a terminal state, using the configured schedule.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::WaitTimeout`] with the last known status when the
    /// deadline passes, or a permanent status-read error.
    pub async fn wait_for_completion(&self, job_id: &str) -> Result<Job, JobError> {
        let polling = self.inner.polling.clone();
        self.wait_for_completion_with(job_id, &polling, |_| {}).await
    }

    /// Polls until the job reaches a terminal state, calling `on_update`
    /// after every successful status read.
    ///
    /// # Errors
    ///
    /// See [`wait_for_completion`](Self::wait_for_completion).
    #[instrument(skip(self, polling, on_update))]
    pub async fn wait_for_completion_with<F>(
        &self,
        job_id: &str,
        polling: &PollConfig,
        mut on_update: F,
    ) -> Result<Job, JobError>
    where
        F: FnMut(&Job) + Send,
    {
        let clock = &self.inner.clock;
        let mut poller = StatusPoller::new(job_id, polling, clock.now());

        loop {
            match poller.next_step(clock.now()) {
                PollStep::Check => match self.get_status(job_id).await {
                    Ok(job) => {
                        on_update(&job);
                        poller.record_status(job, clock.now());
                    }
                    Err(error) => poller.record_error(error, clock.now())?,
                },
                PollStep::Sleep(delay) => tokio::time::sleep(delay).await,
                PollStep::Finished(job) => {
                    info!(job_id, status = %job.status, checks = poller.checks(), "wait finished");
                    return Ok(job);
                }
                PollStep::TimedOut {
                    waited,
                    last_status,
                } => return Err(JobError::wait_timeout(job_id, waited, last_status)),
            }
        }
    }

    /// Snapshot of every layer.
    #[must_use]
    pub fn stats(&self) -> ClientStats {
        ClientStats {
            cache: self
                .inner
                .cache
                .as_ref()
                .map(|cache| lock(cache).stats()),
            circuits: self
                .inner
                .breakers
                .as_ref()
                .map(CircuitBreakerRegistry::stats)
                .unwrap_or_default(),
            pool: self.inner.pool.as_ref().map(ConnectionPool::stats),
            in_flight: lock(&self.inner.in_flight).len(),
        }
    }

    /// Cancels queued operations, clears the cache and closes every breaker.
    pub fn reset(&self) {
        let cancelled = self
            .inner
            .pool
            .as_ref()
            .map_or(0, ConnectionPool::clear_queue);
        if let Some(cache) = &self.inner.cache {
            lock(cache).clear();
        }
        if let Some(breakers) = &self.inner.breakers {
            breakers.reset_all();
        }
        info!(cancelled, "client optimizations reset");
    }

    /// Waits for pooled work to finish, then clears the cache and stops the sweeper.
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.inner.pool {
            pool.drain().await;
        }
        if let Some(cache) = &self.inner.cache {
            lock(cache).clear();
        }
        if let Some(handle) = lock(&self.inner.sweeper).take() {
            handle.abort();
        }
        info!("client shut down");
    }

    /// Starts the periodic cache sweep.
    ///
    /// Returns `false` when caching is disabled or a sweep is already running.
    pub fn spawn_cache_cleanup(&self) -> bool {
        let Some(cache) = &self.inner.cache else {
            return false;
        };
        let mut sweeper = lock(&self.inner.sweeper);
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        *sweeper = Some(spawn_cleanup_task(
            Arc::clone(cache),
            self.inner.cache_config.cleanup_interval(),
        ));
        true
    }

    /// Removes every cache entry of `job_id`; returns how many were removed.
    pub fn invalidate_job(&self, job_id: &str) -> usize {
        self.inner
            .cache
            .as_ref()
            .map_or(0, |cache| lock(cache).invalidate(&job_cache_prefix(job_id)))
    }

    fn cached_status(&self, job_id: &str) -> Option<Job> {
        let cache = self.inner.cache.as_ref()?;
        lock(cache).get(&status_cache_key(job_id))
    }

    async fn dedup(&self, request: JobRequest, priority: i32) -> Result<JobResponse, JobError> {
        let key = request.operation_key();

        let shared = {
            let mut in_flight = lock(&self.inner.in_flight);
            if let Some(existing) = in_flight.get(&key) {
                debug!(key = %key, "joining in-flight request");
                existing.clone()
            } else {
                // The call runs in its own task so it settles, releases its
                // pool slot and leaves `in_flight` even if every caller is dropped.
                let inner = Arc::clone(&self.inner);
                let task_key = key.clone();
                let handle = tokio::spawn(async move {
                    let started = inner.clock.now();
                    let result = inner.run(&request, priority).await;
                    lock(&inner.in_flight).remove(&task_key);
                    if let Ok(response) = &result {
                        inner.write_through(&request, response, started);
                    }
                    result
                });

                let join_key = key.clone();
                let future = async move {
                    handle.await.unwrap_or_else(|error| {
                        Err(JobError::task_failed(join_key, error.to_string()))
                    })
                }
                .boxed()
                .shared();
                in_flight.insert(key, future.clone());
                future
            }
        };

        shared.await
    }
}

impl ClientInner {
    async fn run(&self, request: &JobRequest, priority: i32) -> Result<JobResponse, JobError> {
        match &self.breakers {
            Some(breakers) => {
                let breaker = breakers.get(request.resource());
                breaker
                    .execute(|| self.run_pooled(request, priority))
                    .await
            }
            None => self.run_pooled(request, priority).await,
        }
    }

    async fn run_pooled(&self, request: &JobRequest, priority: i32) -> Result<JobResponse, JobError> {
        let api = self.api.as_ref();
        match &self.pool {
            Some(pool) => pool.execute(move || call_api(api, request), priority).await,
            None => call_api(api, request).await,
        }
    }

    fn write_through(&self, request: &JobRequest, response: &JobResponse, started: Instant) {
        let (Some(cache), JobResponse::Job(job)) = (&self.cache, response) else {
            return;
        };
        let key = status_cache_key(&job.id);
        let mut cache = lock(cache);

        // A cancel that landed while this read was in flight wrote a newer record.
        if matches!(request, JobRequest::Status { .. })
            && cache.peek(&key).is_some_and(|entry| entry.created_at > started)
        {
            debug!(job_id = %job.id, "skipping stale status write");
            return;
        }

        cache.set(key, job.clone(), None);
        debug!(job_id = %job.id, operation = request.operation(), "cached job status");
    }
}

async fn call_api(api: &dyn JobApi, request: &JobRequest) -> Result<JobResponse, JobError> {
    match request {
        JobRequest::Create(create) => api.create_job(create).await.map(JobResponse::Job),
        JobRequest::Status { job_id } => api.get_status(job_id).await.map(JobResponse::Job),
        JobRequest::Cancel { job_id } => api.cancel_job(job_id).await.map(JobResponse::Job),
        JobRequest::FetchResult { job_id } => {
            api.fetch_result(job_id).await.map(JobResponse::Result)
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

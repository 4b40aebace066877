//! OptimizedClient composition: cache, dedup, breakers, pool and polling
//! against a scripted in-memory API.

use std::sync::Arc;
use std::time::Duration;

use jobdl_core::config::PollConfig;
use jobdl_core::{
    CircuitState, ClientConfig, CreateJobRequest, JobError, JobStatus, OptimizedClient,
};

mod support;
use support::fake_api::{FakeJobApi, job};

fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.pool.retry_base_delay_ms = 5;
    config.pool.retry_max_delay_ms = 20;
    config
}

fn fast_polling() -> PollConfig {
    PollConfig {
        initial_interval_ms: 10,
        slowdown_after_ms: 1_000,
        max_interval_ms: 50,
        timeout_ms: 5_000,
    }
}

fn client_for(api: &Arc<FakeJobApi>, config: &ClientConfig) -> OptimizedClient {
    OptimizedClient::new(Arc::clone(api) as Arc<dyn jobdl_core::JobApi>, config)
}

#[tokio::test]
async fn test_concurrent_identical_status_reads_share_one_call() {
    let api = Arc::new(FakeJobApi::new().with_delay(Duration::from_millis(50)));
    let client = client_for(&api, &fast_config());

    let (first, second) = tokio::join!(client.get_status("j1"), client.get_status("j1"));

    assert_eq!(first.expect("first"), second.expect("second"));
    assert_eq!(api.status_calls(), 1);
    assert_eq!(client.stats().in_flight, 0);
}

#[tokio::test]
async fn test_different_jobs_are_not_deduplicated() {
    let api = Arc::new(FakeJobApi::new().with_delay(Duration::from_millis(20)));
    let client = client_for(&api, &fast_config());

    let (a, b) = tokio::join!(client.get_status("a"), client.get_status("b"));

    assert_eq!(a.expect("a").id, "a");
    assert_eq!(b.expect("b").id, "b");
    assert_eq!(api.status_calls(), 2);
}

#[tokio::test]
async fn test_status_read_is_served_from_cache() {
    let api = Arc::new(FakeJobApi::new());
    let client = client_for(&api, &fast_config());

    client.get_status("j1").await.expect("first read");
    let cached = client.get_status("j1").await.expect("second read");

    assert_eq!(cached.status, JobStatus::Downloading);
    assert_eq!(api.status_calls(), 1);

    let cache = client.stats().cache.expect("cache enabled");
    assert_eq!(cache.hits, 1);
    assert_eq!(cache.misses, 1);
    assert_eq!(cache.size, 1);
}

#[tokio::test]
async fn test_cancel_replaces_cached_status() {
    let api = Arc::new(FakeJobApi::new());
    let client = client_for(&api, &fast_config());

    client.get_status("j1").await.expect("status");
    let cancelled = client.cancel_job("j1").await.expect("cancel");
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let after = client.get_status("j1").await.expect("status after cancel");
    assert_eq!(after.status, JobStatus::Cancelled);
    assert_eq!(api.cancel_calls(), 1);
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn test_created_job_is_written_through_to_cache() {
    let api = Arc::new(FakeJobApi::new());
    let client = client_for(&api, &fast_config());

    let created = client
        .create_job(CreateJobRequest::new("acme", "video-1").with_save_location("/srv/media"))
        .await
        .expect("create");
    assert_eq!(created.save_location.as_deref(), Some("/srv/media"));

    let status = client.get_status(&created.id).await.expect("status");
    assert_eq!(status.status, JobStatus::Pending);
    assert_eq!(api.status_calls(), 0);
}

#[tokio::test]
async fn test_blank_create_request_never_reaches_api() {
    let api = Arc::new(FakeJobApi::new());
    let client = client_for(&api, &fast_config());

    let err = client
        .create_job(CreateJobRequest::new("  ", "video-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::InvalidRequest { .. }));
    assert_eq!(api.create_calls(), 0);
}

#[tokio::test]
async fn test_results_are_not_cached() {
    let api = Arc::new(FakeJobApi::new());
    let client = client_for(&api, &fast_config());

    assert_eq!(client.fetch_result("j1").await.expect("first"), b"payload");
    assert_eq!(client.fetch_result("j1").await.expect("second"), b"payload");
    assert_eq!(api.result_calls(), 2);
}

#[tokio::test]
async fn test_disabled_layers_are_bypassed() {
    let mut config = fast_config();
    config.cache.enabled = false;
    config.circuit_breaker.enabled = false;
    config.pool.enabled = false;

    let api = Arc::new(FakeJobApi::new());
    let client = client_for(&api, &config);

    client.get_status("j1").await.expect("first");
    client.get_status("j1").await.expect("second");
    assert_eq!(api.status_calls(), 2);

    let stats = client.stats();
    assert!(stats.cache.is_none());
    assert!(stats.pool.is_none());
    assert!(stats.circuits.is_empty());
}

#[tokio::test]
async fn test_failing_status_endpoint_opens_its_circuit() {
    let mut config = fast_config();
    config.cache.enabled = false;
    config.pool.retry_attempts = 0;
    config.circuit_breaker.failure_threshold = 2;

    let api = Arc::new(FakeJobApi::new().with_statuses(vec![
        Err(JobError::http_status("get_status", 503)),
        Err(JobError::http_status("get_status", 503)),
    ]));
    let client = client_for(&api, &config);

    for _ in 0..2 {
        let err = client.get_status("j1").await.unwrap_err();
        assert!(matches!(
            err,
            JobError::ExhaustedRetries { attempts: 1, .. }
        ));
    }

    let err = client.get_status("j1").await.unwrap_err();
    assert!(matches!(err, JobError::CircuitOpen { ref resource, .. } if resource == "jobs.status"));
    assert_eq!(api.status_calls(), 2);

    // Other resources keep their own breaker.
    client.fetch_result("j1").await.expect("result endpoint unaffected");

    let circuits = client.stats().circuits;
    let status = circuits
        .iter()
        .find(|c| c.name == "jobs.status")
        .expect("status breaker");
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.rejected_requests, 1);

    client.reset();
    client.get_status("j1").await.expect("closed after reset");
}

#[tokio::test]
async fn test_abandoned_read_still_settles_and_frees_its_slot() {
    let mut config = fast_config();
    config.pool.max_connections = 1;

    let api = Arc::new(FakeJobApi::new().with_delay(Duration::from_millis(200)));
    let client = client_for(&api, &config);

    let abandoned = tokio::time::timeout(Duration::from_millis(20), client.get_status("j1")).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let stats = client.stats();
    assert_eq!(stats.pool.expect("pool enabled").active, 0);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(api.status_calls(), 1);

    // The abandoned read finished in the background and cached its answer.
    let cached = tokio::time::timeout(Duration::from_secs(2), client.get_status("j1"))
        .await
        .expect("cached read is immediate")
        .expect("j1");
    assert_eq!(cached.status, JobStatus::Downloading);
    assert_eq!(api.status_calls(), 1);

    tokio::time::timeout(Duration::from_secs(2), client.get_status("j2"))
        .await
        .expect("slot was released")
        .expect("j2");
    tokio::time::timeout(Duration::from_secs(2), client.shutdown())
        .await
        .expect("shutdown does not hang");
}

#[tokio::test]
async fn test_reset_with_queued_reads_leaves_circuits_closed() {
    let mut config = fast_config();
    config.cache.enabled = false;
    config.pool.max_connections = 1;
    config.circuit_breaker.failure_threshold = 3;

    let api = Arc::new(FakeJobApi::new().with_delay(Duration::from_millis(100)));
    let client = client_for(&api, &config);

    let handles: Vec<_> = (0..5)
        .map(|n| {
            let client = client.clone();
            tokio::spawn(async move { client.get_status(&format!("j{n}")).await })
        })
        .collect();
    while client.stats().pool.expect("pool enabled").queued != 4 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    client.reset();

    let mut completed = 0;
    let mut cancelled = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(JobError::Cancelled { .. }) => cancelled += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!((completed, cancelled), (1, 4));

    let stats = client.stats();
    for circuit in &stats.circuits {
        assert_eq!(circuit.state, CircuitState::Closed, "{}", circuit.name);
        assert_eq!(circuit.failure_count, 0, "{}", circuit.name);
    }
    assert_eq!(stats.pool.expect("pool enabled").active, 0);
    assert_eq!(stats.in_flight, 0);

    client.get_status("j9").await.expect("usable after reset");
}

#[tokio::test]
async fn test_status_read_overlapping_cancel_keeps_cancelled_record() {
    let api = Arc::new(FakeJobApi::new().with_status_delay(Duration::from_millis(100)));
    let client = client_for(&api, &fast_config());

    let read = {
        let client = client.clone();
        tokio::spawn(async move { client.get_status("j1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancelled = client.cancel_job("j1").await.expect("cancel");
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    // The read began before the cancel and returns what it saw.
    let stale = read.await.unwrap().expect("read");
    assert_eq!(stale.status, JobStatus::Downloading);

    let after = client.get_status("j1").await.expect("status after cancel");
    assert_eq!(after.status, JobStatus::Cancelled);
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn test_pool_retries_transient_status_failure() {
    let mut config = fast_config();
    config.cache.enabled = false;
    config.pool.retry_attempts = 2;

    let api = Arc::new(
        FakeJobApi::new().with_statuses(vec![Err(JobError::http_status("get_status", 502))]),
    );
    let client = client_for(&api, &config);

    let job = client.get_status("j1").await.expect("retried");
    assert_eq!(job.status, JobStatus::Downloading);
    assert_eq!(api.status_calls(), 2);

    let pool = client.stats().pool.expect("pool enabled");
    assert_eq!(pool.retried, 1);
    assert_eq!(pool.completed, 1);
}

#[tokio::test]
async fn test_wait_for_completion_reports_each_status() {
    let mut config = fast_config();
    config.cache.enabled = false;

    let api = Arc::new(FakeJobApi::new().with_statuses(vec![
        Ok(job("j1", JobStatus::Pending)),
        Ok(job("j1", JobStatus::Downloading)),
        Ok(job("j1", JobStatus::Completed)),
    ]));
    let client = client_for(&api, &config);

    let mut seen = Vec::new();
    let finished = client
        .wait_for_completion_with("j1", &fast_polling(), |job| seen.push(job.status))
        .await
        .expect("wait");

    assert_eq!(finished.status, JobStatus::Completed);
    assert_eq!(
        seen,
        vec![
            JobStatus::Pending,
            JobStatus::Downloading,
            JobStatus::Completed
        ]
    );
    assert_eq!(api.status_calls(), 3);
}

#[tokio::test]
async fn test_wait_survives_transient_status_failure() {
    let mut config = fast_config();
    config.cache.enabled = false;
    config.pool.retry_attempts = 0;

    let api = Arc::new(FakeJobApi::new().with_statuses(vec![
        Err(JobError::http_status("get_status", 503)),
        Ok(job("j1", JobStatus::Failed)),
    ]));
    let client = client_for(&api, &config);

    let finished = client
        .wait_for_completion_with("j1", &fast_polling(), |_| {})
        .await
        .expect("wait");

    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(api.status_calls(), 2);
}

#[tokio::test]
async fn test_wait_stops_on_permanent_failure() {
    let mut config = fast_config();
    config.cache.enabled = false;

    let api = Arc::new(
        FakeJobApi::new().with_statuses(vec![Err(JobError::http_status("get_status", 404))]),
    );
    let client = client_for(&api, &config);

    let err = client
        .wait_for_completion_with("missing", &fast_polling(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, JobError::HttpStatus { status: 404, .. }));
    assert_eq!(api.status_calls(), 1);
}

#[tokio::test]
async fn test_wait_times_out_with_last_status() {
    let mut config = fast_config();
    config.cache.enabled = false;

    let api = Arc::new(FakeJobApi::new().with_fallback_status(JobStatus::Downloading));
    let client = client_for(&api, &config);

    let polling = PollConfig {
        timeout_ms: 60,
        ..fast_polling()
    };
    let err = client
        .wait_for_completion_with("j1", &polling, |_| {})
        .await
        .unwrap_err();

    match err {
        JobError::WaitTimeout {
            job_id,
            last_status,
            waited,
        } => {
            assert_eq!(job_id, "j1");
            assert_eq!(last_status, Some(JobStatus::Downloading));
            assert!(waited >= Duration::from_millis(60));
        }
        other => panic!("expected wait timeout, got {other:?}"),
    }
    assert!(api.status_calls() >= 2);
}

#[tokio::test]
async fn test_shutdown_clears_cache_and_stops_sweeper() {
    let api = Arc::new(FakeJobApi::new());
    let client = client_for(&api, &fast_config());

    assert!(client.spawn_cache_cleanup());
    assert!(!client.spawn_cache_cleanup());

    client.get_status("j1").await.expect("status");
    assert_eq!(client.stats().cache.expect("cache").size, 1);

    client.shutdown().await;

    let stats = client.stats();
    assert_eq!(stats.cache.expect("cache").size, 0);
    assert_eq!(stats.pool.expect("pool").active, 0);
    assert!(client.spawn_cache_cleanup());
    client.shutdown().await;
}

#[tokio::test]
async fn test_invalidate_job_removes_only_that_job() {
    let api = Arc::new(FakeJobApi::new());
    let client = client_for(&api, &fast_config());

    client.get_status("j1").await.expect("j1");
    client.get_status("j2").await.expect("j2");

    assert_eq!(client.invalidate_job("j1"), 1);
    assert_eq!(client.stats().cache.expect("cache").size, 1);

    client.get_status("j2").await.expect("j2 cached");
    assert_eq!(api.status_calls(), 2);
}

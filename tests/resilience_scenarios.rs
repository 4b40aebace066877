//! End-to-end behavior of the cache, circuit breaker and pool in isolation.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use jobdl_core::config::{CircuitBreakerConfig, PoolConfig};
use jobdl_core::{
    CircuitBreakerRegistry, CircuitState, ConnectionPool, JobError, MockClock, ResponseCache,
};
use tokio_test::{assert_err, assert_ok};

/// Cache entry with a 100ms TTL is served at 50ms and gone at 110ms.
#[test]
fn test_cache_entry_expires_after_ttl() {
    let clock = MockClock::new();
    let mut cache =
        ResponseCache::with_clock(10, Duration::from_millis(100), Arc::new(clock.clone()));

    cache.set("job_1", "done".to_string(), None);

    clock.advance_millis(50);
    assert_eq!(cache.get("job_1").as_deref(), Some("done"));

    clock.advance_millis(60);
    assert_eq!(cache.get("job_1"), None);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.expirations, 1);
    assert_eq!(stats.size, 0);
}

/// Three failures open the circuit; the fourth call never reaches the operation.
#[tokio::test]
async fn test_breaker_opens_after_threshold_and_recovers() {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig {
        failure_threshold: 3,
        success_threshold: 2,
        recovery_timeout_ms: 1_000,
        ..CircuitBreakerConfig::default()
    };
    let registry = CircuitBreakerRegistry::with_clock(config, Arc::new(clock.clone()));
    let breaker = registry.get("jobs.status");
    let calls = Arc::new(Mutex::new(0_u32));

    let failing = || {
        let calls = Arc::clone(&calls);
        async move {
            *calls.lock().unwrap() += 1;
            Err::<(), _>(JobError::http_status("get_status", 503))
        }
    };

    for _ in 0..3 {
        assert_err!(breaker.execute(failing).await);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let rejected = breaker.execute(failing).await.unwrap_err();
    assert!(matches!(rejected, JobError::CircuitOpen { .. }));
    assert_eq!(*calls.lock().unwrap(), 3);

    clock.advance_millis(1_000);
    assert_ok!(breaker.execute(|| async { Ok::<_, JobError>(()) }).await);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    assert_ok!(breaker.execute(|| async { Ok::<_, JobError>(()) }).await);
    assert_eq!(breaker.state(), CircuitState::Closed);

    // The registry hands out the same breaker for the same name.
    assert!(Arc::ptr_eq(&breaker, &registry.get("jobs.status")));
    assert_eq!(registry.stats()[0].rejected_requests, 1);
}

async fn tracked(
    log: Arc<Mutex<Vec<String>>>,
    name: &'static str,
) -> Result<&'static str, JobError> {
    log.lock().unwrap().push(format!("start {name}"));
    tokio::time::sleep(Duration::from_millis(30)).await;
    log.lock().unwrap().push(format!("end {name}"));
    Ok(name)
}

/// With two slots, the high-priority op and the first low-priority op start
/// together; the remaining op waits for a slot.
#[tokio::test]
async fn test_pool_dispatches_by_priority_within_limit() {
    let pool = ConnectionPool::new(&PoolConfig {
        max_connections: 2,
        ..PoolConfig::default()
    });
    let log = Arc::new(Mutex::new(Vec::new()));

    let (op1, op2, op3) = tokio::join!(
        pool.execute(|| tracked(Arc::clone(&log), "op1"), 0),
        pool.execute(|| tracked(Arc::clone(&log), "op2"), 0),
        pool.execute(|| tracked(Arc::clone(&log), "op3"), 5),
    );
    assert_eq!(
        (op1.unwrap(), op2.unwrap(), op3.unwrap()),
        ("op1", "op2", "op3")
    );

    let log = log.lock().unwrap().clone();
    let mut first_two: Vec<&str> = log[..2].iter().map(String::as_str).collect();
    first_two.sort_unstable();
    assert_eq!(first_two, vec!["start op1", "start op3"]);

    let op2_start = log.iter().position(|e| e == "start op2").unwrap();
    let first_end = log.iter().position(|e| e.starts_with("end")).unwrap();
    assert!(op2_start > first_end, "op2 started before a slot was free: {log:?}");

    let stats = pool.stats();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.active, 0);
    assert_eq!(stats.queued, 0);
}

/// Two retries mean three invocations, with a growing pause between them.
#[tokio::test]
async fn test_pool_retries_then_gives_up() {
    let pool = ConnectionPool::new(&PoolConfig {
        retry_attempts: 2,
        retry_base_delay_ms: 20,
        retry_max_delay_ms: 1_000,
        ..PoolConfig::default()
    });
    let invocations = Arc::new(Mutex::new(Vec::new()));

    let result = pool
        .execute(
            || {
                let invocations = Arc::clone(&invocations);
                async move {
                    invocations.lock().unwrap().push(Instant::now());
                    Err::<(), _>(JobError::http_status("get_status", 500))
                }
            },
            0,
        )
        .await;

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        JobError::ExhaustedRetries { attempts: 3, ref last }
            if matches!(**last, JobError::HttpStatus { status: 500, .. })
    ));

    let invocations = invocations.lock().unwrap().clone();
    assert_eq!(invocations.len(), 3);
    assert!(invocations[1] - invocations[0] >= Duration::from_millis(20));
    assert!(invocations[2] - invocations[1] >= Duration::from_millis(40));

    let stats = pool.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_clearing_queue_cancels_waiting_callers() {
    let pool = ConnectionPool::new(&PoolConfig {
        max_connections: 1,
        ..PoolConfig::default()
    });
    let log = Arc::new(Mutex::new(Vec::new()));

    let running = {
        let pool = pool.clone();
        let log = Arc::clone(&log);
        tokio::spawn(async move { pool.execute(|| tracked(Arc::clone(&log), "running"), 0).await })
    };
    let waiting = {
        let pool = pool.clone();
        let log = Arc::clone(&log);
        tokio::spawn(async move { pool.execute(|| tracked(Arc::clone(&log), "waiting"), 0).await })
    };

    // Both entries are submitted and the first holds the only slot.
    while pool.stats().queued != 1 || pool.stats().active != 1 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert_eq!(pool.clear_queue(), 1);
    assert_eq!(running.await.unwrap().unwrap(), "running");
    assert!(matches!(waiting.await.unwrap(), Err(JobError::Cancelled { .. })));
    assert_eq!(pool.stats().cancelled, 1);
}

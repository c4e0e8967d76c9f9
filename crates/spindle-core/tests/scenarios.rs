//! End-to-end scenarios through the public scheduler API.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::rstest;
use spindle_core::domain::TaskId;
use spindle_core::resilience::{BreakerState, ConcurrencyLimiter};
use spindle_core::{ActionError, EngineError, ErrorKind, Lifecycle, Scheduler, TaskStatus};
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Tracks how many actions run at once and the peak.
#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn concurrency_two_runs_five_tasks_in_three_waves() {
    init_tracing();
    let scheduler = Scheduler::<usize>::builder().concurrency(2).build().unwrap();
    let gauge = Arc::new(Gauge::default());
    let start = Instant::now();

    let mut ids = Vec::new();
    for n in 0..5 {
        let gauge = Arc::clone(&gauge);
        let id = scheduler
            .submit(move || {
                let gauge = Arc::clone(&gauge);
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    gauge.leave();
                    Ok::<usize, ActionError>(n)
                }
            })
            .await
            .unwrap();
        ids.push(id);
    }

    for (n, id) in ids.into_iter().enumerate() {
        let view = scheduler.wait(id).await.unwrap();
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.result, Some(n));
    }

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "finished too early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(350), "finished too late: {elapsed:?}");
    assert_eq!(gauge.peak(), 2);

    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.completed, 5);
    assert_eq!(metrics.in_use, 0);
}

#[tokio::test(start_paused = true)]
async fn fail_fail_succeed_backs_off_between_attempts() {
    init_tracing();
    let scheduler = Scheduler::<&'static str>::builder()
        .base_delay(Duration::from_millis(10))
        .jitter(0.0)
        .build()
        .unwrap();

    let started: Arc<Mutex<Vec<Instant>>> = Arc::default();
    let log = Arc::clone(&started);
    let id = scheduler
        .submit(move || {
            let attempt = {
                let mut log = log.lock().unwrap();
                log.push(Instant::now());
                log.len()
            };
            async move {
                if attempt < 3 {
                    Err(ActionError::transient(format!("attempt {attempt} failed")))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

    let view = scheduler.wait(id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.attempts, 3);
    assert_eq!(view.result, Some("done"));
    assert!(view.error.is_none());
    assert_eq!(view.history.len(), 3);
    assert!(view.history[0].error.is_some());
    assert!(view.history[1].error.is_some());
    assert!(view.history[2].succeeded());

    let started = started.lock().unwrap();
    assert!(started[1] - started[0] >= Duration::from_millis(10));
    assert!(started[2] - started[1] >= Duration::from_millis(20));
}

#[tokio::test(start_paused = true)]
async fn breaker_holds_back_work_until_cool_down() {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder()
        .concurrency(1)
        .max_attempts(1)
        .failure_threshold(3)
        .cool_down(Duration::from_secs(1))
        .build()
        .unwrap();
    let start = Instant::now();

    let mut failing = Vec::new();
    for _ in 0..3 {
        let id = scheduler
            .submit(|| async { Err::<u32, _>(ActionError::transient("backend down")) })
            .await
            .unwrap();
        failing.push(id);
    }
    let healthy = scheduler
        .submit(|| async { Ok::<u32, ActionError>(4) })
        .await
        .unwrap();

    for id in failing {
        assert_eq!(scheduler.wait(id).await.unwrap().status, TaskStatus::Failed);
    }

    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.breaker.state, BreakerState::Open);
    assert_eq!(metrics.breaker.trips, 1);
    assert_eq!(metrics.ready, 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    let view = scheduler.status(healthy).await.unwrap();
    assert_eq!(view.status, TaskStatus::Pending);
    assert_eq!(view.attempts, 0);

    let view = scheduler.wait(healthy).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert!(view.history[0].probe);
    assert!(start.elapsed() >= Duration::from_secs(1));

    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.breaker.state, BreakerState::Closed);
    assert_eq!(metrics.breaker.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_the_breaker() {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder()
        .concurrency(1)
        .max_attempts(1)
        .failure_threshold(1)
        .cool_down(Duration::from_secs(1))
        .build()
        .unwrap();
    let start = Instant::now();

    let first = scheduler
        .submit(|| async { Err::<u32, _>(ActionError::transient("down")) })
        .await
        .unwrap();
    let probe = scheduler
        .submit(|| async { Err::<u32, _>(ActionError::transient("still down")) })
        .await
        .unwrap();
    let last = scheduler
        .submit(|| async { Ok::<u32, ActionError>(3) })
        .await
        .unwrap();

    scheduler.wait(first).await.unwrap();
    let view = scheduler.wait(probe).await.unwrap();
    assert!(view.history[0].probe);
    assert_eq!(scheduler.metrics().await.breaker.trips, 2);

    let view = scheduler.wait(last).await.unwrap();
    assert_eq!(view.status, TaskStatus::Completed);
    assert!(view.history[0].probe);
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn half_open_breaker_admits_one_task_despite_free_slots() {
    init_tracing();
    let scheduler = Scheduler::<usize>::builder()
        .concurrency(4)
        .max_attempts(1)
        .failure_threshold(2)
        .cool_down(Duration::from_secs(1))
        .build()
        .unwrap();
    let start = Instant::now();

    for _ in 0..2 {
        let id = scheduler
            .submit(|| async { Err::<usize, _>(ActionError::transient("backend down")) })
            .await
            .unwrap();
        assert_eq!(scheduler.wait(id).await.unwrap().status, TaskStatus::Failed);
    }
    assert_eq!(scheduler.metrics().await.breaker.state, BreakerState::Open);

    let gauge = Arc::new(Gauge::default());
    let started: Arc<Mutex<Vec<(usize, Instant)>>> = Arc::default();
    let mut ids = Vec::new();
    for n in 0..4 {
        let gauge = Arc::clone(&gauge);
        let started = Arc::clone(&started);
        let id = scheduler
            .submit(move || {
                started.lock().unwrap().push((n, Instant::now()));
                let gauge = Arc::clone(&gauge);
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    gauge.leave();
                    Ok::<usize, ActionError>(n)
                }
            })
            .await
            .unwrap();
        ids.push(id);
    }

    // Cool-down is over and the first task is out testing the backend.
    tokio::time::sleep_until(start + Duration::from_millis(1050)).await;
    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.breaker.state, BreakerState::HalfOpen);
    assert_eq!(metrics.running, 1);
    assert_eq!(metrics.ready, 3);
    assert_eq!(metrics.in_use, 1);

    let mut admitted_alone = 0;
    for (n, id) in ids.into_iter().enumerate() {
        let view = scheduler.wait(id).await.unwrap();
        assert_eq!(view.status, TaskStatus::Completed);
        assert_eq!(view.result, Some(n));
        if view.history[0].probe {
            admitted_alone += 1;
        }
    }
    assert_eq!(admitted_alone, 1);
    assert_eq!(gauge.peak(), 3);

    let started = started.lock().unwrap();
    let (first, first_at) = started[0];
    assert_eq!(first, 0);
    assert!(first_at >= start + Duration::from_secs(1));
    for &(_, at) in &started[1..] {
        assert!(at >= first_at + Duration::from_millis(100));
    }
    assert_eq!(scheduler.metrics().await.breaker.state, BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn tasks_start_in_submission_order() {
    init_tracing();
    let scheduler = Scheduler::<usize>::builder().concurrency(1).build().unwrap();
    scheduler.pause().await;

    let order: Arc<Mutex<Vec<usize>>> = Arc::default();
    let mut ids = Vec::new();
    for n in 0..8 {
        let order = Arc::clone(&order);
        let id = scheduler
            .submit(move || {
                order.lock().unwrap().push(n);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<usize, ActionError>(n)
                }
            })
            .await
            .unwrap();
        ids.push(id);
    }
    assert_eq!(scheduler.metrics().await.ready, 8);

    scheduler.resume().await;
    for id in ids {
        scheduler.wait(id).await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
}

#[rstest]
#[case::single_attempt(1)]
#[case::default_budget(3)]
#[case::generous_budget(6)]
#[tokio::test(start_paused = true)]
async fn always_failing_task_stops_at_max_attempts(#[case] max_attempts: u32) {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder()
        .max_attempts(max_attempts)
        .failure_threshold(100)
        .base_delay(Duration::from_millis(10))
        .build()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let id = scheduler
        .submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>(ActionError::transient("always")) }
        })
        .await
        .unwrap();

    let view = scheduler.wait(id).await.unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.attempts, max_attempts);
    assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
    assert_eq!(view.error.map(|e| e.kind()), Some(ErrorKind::Transient));
    assert!(view.result.is_none());
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_are_idempotent() {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder().build().unwrap();

    scheduler.pause().await;
    scheduler.pause().await;
    let id = scheduler
        .submit(|| async { Ok::<u32, ActionError>(1) })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.status(id).await.unwrap().status, TaskStatus::Pending);
    assert!(scheduler.metrics().await.paused);

    scheduler.resume().await;
    scheduler.resume().await;
    assert_eq!(scheduler.wait(id).await.unwrap().status, TaskStatus::Completed);
    assert!(!scheduler.metrics().await.paused);
}

#[tokio::test(start_paused = true)]
async fn pause_lets_running_tasks_finish() {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder().concurrency(1).build().unwrap();
    let running = scheduler
        .submit(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<u32, ActionError>(1)
        })
        .await
        .unwrap();
    let queued = scheduler
        .submit(|| async { Ok::<u32, ActionError>(2) })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    scheduler.pause().await;

    assert_eq!(scheduler.wait(running).await.unwrap().status, TaskStatus::Completed);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(scheduler.status(queued).await.unwrap().status, TaskStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn draining_shutdown_finishes_accepted_work() {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder()
        .concurrency(2)
        .base_delay(Duration::from_millis(10))
        .build()
        .unwrap();
    scheduler.pause().await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let flaky = scheduler
        .submit(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(ActionError::transient("first try"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
    let mut slow = Vec::new();
    for n in 0..3 {
        let id = scheduler
            .submit(move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<u32, ActionError>(n)
            })
            .await
            .unwrap();
        slow.push(id);
    }

    scheduler.shutdown(true).await;

    assert_eq!(scheduler.status(flaky).await.unwrap().status, TaskStatus::Completed);
    for id in slow {
        assert_eq!(scheduler.status(id).await.unwrap().status, TaskStatus::Completed);
    }
    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.lifecycle, Lifecycle::Draining);
    assert_eq!(metrics.in_flight(), 0);
    assert_eq!(
        scheduler.submit(|| async { Ok::<u32, ActionError>(0) }).await,
        Err(EngineError::EngineClosed)
    );
}

#[tokio::test(start_paused = true)]
async fn cancelling_shutdown_fails_pending_tasks() {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder()
        .concurrency(1)
        .base_delay(Duration::from_millis(10))
        .build()
        .unwrap();

    let running = scheduler
        .submit(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err::<u32, _>(ActionError::transient("would retry"))
        })
        .await
        .unwrap();
    let queued = scheduler
        .submit(|| async { Ok::<u32, ActionError>(2) })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    scheduler.shutdown(false).await;

    let view = scheduler.status(queued).await.unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.attempts, 0);
    assert_eq!(view.error.map(|e| e.kind()), Some(ErrorKind::Cancelled));
    assert_eq!(
        scheduler.status(running).await.unwrap().status,
        TaskStatus::Running
    );

    let view = scheduler.wait(running).await.unwrap();
    assert_eq!(view.status, TaskStatus::Failed);
    assert_eq!(view.attempts, 1);
    assert_eq!(view.error.map(|e| e.kind()), Some(ErrorKind::Cancelled));

    // Waits for the dispatch loop to exit.
    scheduler.shutdown(true).await;
    assert_eq!(scheduler.metrics().await.lifecycle, Lifecycle::Cancelling);
    assert_eq!(
        scheduler.submit(|| async { Ok::<u32, ActionError>(0) }).await,
        Err(EngineError::EngineClosed)
    );
}

#[tokio::test]
async fn unknown_task_ids_are_reported() {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder().build().unwrap();
    let stranger = TaskId::from_ulid(ulid::Ulid::new());

    assert_eq!(
        scheduler.status(stranger).await,
        Err(EngineError::UnknownTask(stranger))
    );
    assert_eq!(
        scheduler.wait(stranger).await,
        Err(EngineError::UnknownTask(stranger))
    );
    assert_eq!(
        scheduler.take(stranger).await,
        Err(EngineError::UnknownTask(stranger))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn limiter_never_exceeds_capacity_under_contention() {
    let limiter = ConcurrencyLimiter::new(3);
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let limiter = limiter.clone();
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            for _ in 0..20 {
                let permit = limiter.acquire().await;
                let in_use = limiter.in_use();
                assert!(in_use <= limiter.capacity());
                peak.fetch_max(in_use, Ordering::SeqCst);
                tokio::task::yield_now().await;
                limiter.release(permit);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(limiter.in_use(), 0);
    assert_eq!(limiter.available(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn engine_respects_concurrency_on_a_multi_thread_runtime() {
    init_tracing();
    let scheduler = Scheduler::<u32>::builder()
        .concurrency(3)
        .failure_threshold(100)
        .build()
        .unwrap();
    let gauge = Arc::new(Gauge::default());

    let mut ids = Vec::new();
    for n in 0..40u32 {
        let gauge = Arc::clone(&gauge);
        let id = scheduler
            .submit(move || {
                let gauge = Arc::clone(&gauge);
                async move {
                    gauge.enter();
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    gauge.leave();
                    if n % 7 == 0 {
                        Err(ActionError::permanent("unlucky"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        ids.push(id);
    }

    scheduler.shutdown(true).await;

    assert!(gauge.peak() <= 3, "peak concurrency {}", gauge.peak());
    let metrics = scheduler.metrics().await;
    assert_eq!(metrics.completed + metrics.failed, 40);
    for id in ids {
        assert!(scheduler.status(id).await.unwrap().is_terminal());
    }
}

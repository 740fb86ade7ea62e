use super::*;
use static_assertions::assert_impl_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

assert_impl_all!(ThreadPool: Send, Sync);
assert_impl_all!(Handle: Send, Sync, Clone);

fn pool(threads: usize) -> ThreadPool {
    Builder::new()
        .worker_threads(threads)
        .try_build()
        .expect("failed to build pool")
}

#[track_caller]
fn wait_until(cond: impl Fn() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for condition"
        );
        thread::yield_now();
    }
}

#[test]
fn try_execute_one_on_idle_pool_returns_false() {
    let pool = pool(2);
    assert!(!pool.handle().try_execute_one());
}

#[test]
fn caller_thread_is_lane_zero() {
    let pool = pool(3);
    assert_eq!(pool.handle().current_worker_index(), 0);
    assert_eq!(pool.thread_count(), 3);
}

#[test]
fn workers_report_their_own_lane() {
    let pool = pool(3);
    let handle = pool.handle();

    let lane = Arc::new(AtomicUsize::new(usize::MAX));
    let (handle_in_job, lane_in_job) = (handle.clone(), Arc::clone(&lane));
    handle.schedule(Box::new(move || {
        lane_in_job.store(handle_in_job.current_worker_index(), Ordering::Relaxed);
    }));

    wait_until(|| lane.load(Ordering::Relaxed) != usize::MAX);
    assert!((1..3).contains(&lane.load(Ordering::Relaxed)));
}

#[test]
fn scheduled_jobs_all_run() {
    let pool = pool(3);
    let handle = pool.handle();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..16 {
        let counter = Arc::clone(&counter);
        handle.schedule(Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
    }

    wait_until(|| counter.load(Ordering::Relaxed) == 16);
}

#[test]
fn pinned_job_runs_even_when_hinted_elsewhere() {
    let pool = pool(3);
    let handle = pool.handle();

    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_job = Arc::clone(&ran);
    handle.run_on_thread(
        Box::new(move || {
            ran_in_job.fetch_add(1, Ordering::Relaxed);
        }),
        2,
    );

    wait_until(|| ran.load(Ordering::Relaxed) == 1);
    assert_eq!(handle.test_stats().pinned(), 1);
}

#[test]
fn caller_services_its_own_inbox() {
    let pool = pool(1);
    let handle = pool.handle();

    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_job = Arc::clone(&ran);
    handle.run_on_thread(
        Box::new(move || {
            ran_in_job.fetch_add(1, Ordering::Relaxed);
        }),
        0,
    );

    assert!(handle.try_execute_one());
    assert_eq!(ran.load(Ordering::Relaxed), 1);
    assert!(!handle.try_execute_one());
}

#[test]
fn single_lane_pool_drains_in_service_calls() {
    let pool = pool(1);
    let handle = pool.handle();

    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..4 {
        let counter = Arc::clone(&counter);
        handle.schedule(Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
    }

    for _ in 0..4 {
        assert!(handle.try_execute_one());
    }
    assert!(!handle.try_execute_one());
    assert_eq!(counter.load(Ordering::Relaxed), 4);
    assert_eq!(handle.test_stats().scheduled(), 4);
}

struct PartRecorder {
    hits: Arc<Vec<AtomicUsize>>,
}

impl RapidTask for PartRecorder {
    fn invoke(&self, part: usize, total_parts: usize) {
        assert_eq!(total_parts, self.hits.len());
        self.hits[part].fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn rapid_broadcast_invokes_every_part_once() {
    let pool = pool(4);
    let handle = pool.handle();

    // Eligibility needs every spawned worker parked.
    wait_until(|| handle.parked_workers() == handle.spawned_workers());

    let hits = Arc::new((0..4).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
    let task = Box::new(PartRecorder {
        hits: Arc::clone(&hits),
    });
    assert!(handle.try_run_rapid(task).is_none());

    // The caller participates; the slot retires once the last part is done.
    wait_until(|| {
        handle.try_execute_one();
        !handle.rapid_active()
    });

    for hit in hits.iter() {
        assert_eq!(hit.load(Ordering::Relaxed), 1);
    }
    assert_eq!(handle.test_stats().rapid_accepted(), 1);
}

#[test]
fn rapid_rejected_when_jobs_are_queued() {
    let pool = pool(1);
    let handle = pool.handle();

    handle.schedule(Box::new(|| {}));

    let hits = Arc::new(vec![AtomicUsize::new(0)]);
    let task = Box::new(PartRecorder {
        hits: Arc::clone(&hits),
    });
    assert!(handle.try_run_rapid(task).is_some());
    assert_eq!(handle.test_stats().rapid_attempts(), 1);
    assert_eq!(handle.test_stats().rapid_accepted(), 0);

    assert!(handle.try_execute_one());
    assert!(!handle.try_execute_one());
}

#[test]
fn rapid_rejected_while_broadcast_active() {
    let pool = pool(1);
    let handle = pool.handle();

    let hits = Arc::new(vec![AtomicUsize::new(0)]);
    let armed = Box::new(PartRecorder {
        hits: Arc::clone(&hits),
    });
    assert!(handle.try_run_rapid(armed).is_none());

    let second = Box::new(PartRecorder {
        hits: Arc::new(vec![AtomicUsize::new(0)]),
    });
    assert!(handle.try_run_rapid(second).is_some());

    while handle.rapid_active() {
        handle.try_execute_one();
    }
    assert_eq!(hits[0].load(Ordering::Relaxed), 1);
}

#[test]
fn drop_joins_all_workers() {
    let pool = pool(4);
    drop(pool);
}

#[test]
#[should_panic(expected = "worker threads cannot be set to 0")]
fn builder_rejects_zero_workers() {
    Builder::new().worker_threads(0);
}

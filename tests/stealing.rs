//! Work moving between workers and fibers: stealing from a busy worker's
//! deques, switching to parked fibers that are already runnable, and waiting
//! across job systems.

mod common;

use fibersched::{Counter, JobDesc, JobSystemConfig, Priority, WorkerId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_jobs_pushed_by_a_worker_are_stolen() {
    let job_system = common::job_system(4, 16);
    let ran_on = Arc::new(Mutex::new(Vec::new()));

    let recorder = ran_on.clone();
    job_system.wait_for_jobs(
        Priority::Normal,
        [JobDesc::new(move |ctx| {
            // Children land on this worker's own deque; the others can only
            // reach them by stealing.
            let children = (0..200).map(|_| {
                let recorder = recorder.clone();
                JobDesc::new(move |ctx| {
                    std::thread::sleep(Duration::from_micros(200));
                    recorder.lock().unwrap().push(ctx.worker());
                })
            });
            ctx.wait_for_jobs(Priority::Normal, children);
        })],
    );

    let ran_on = ran_on.lock().unwrap();
    assert_eq!(ran_on.len(), 200);
    let distinct: HashSet<WorkerId> = ran_on.iter().copied().collect();
    assert!(distinct.len() > 1, "all children ran on {distinct:?}");

    #[cfg(feature = "metrics")]
    {
        let metrics = job_system.metrics();
        assert!(metrics.steals > 0, "{metrics:?}");
    }
    job_system.shutdown().expect("Shutdown failed");
}

/// One worker with three fibers. The last job to block finds a parked fiber
/// whose counter is already satisfied and must switch to it; taking a fourth
/// fiber from the pool would abort the process.
#[test]
fn test_blocking_fiber_switches_to_ready_waiter() {
    common::init_test_logging();
    let job_system = fibersched::JobSystem::new(JobSystemConfig {
        workers: 1,
        fibers_per_worker: 3,
        stack_size: 128 * 1024,
        swap_to_ready_waiter: true,
        allow_oversubscription: true,
        ..JobSystemConfig::default()
    })
    .unwrap();
    let finished = Arc::new(AtomicUsize::new(0));

    let done = finished.clone();
    job_system.wait_for_jobs(
        Priority::Normal,
        [JobDesc::new(move |ctx| {
            let first_done = Counter::new(0);
            let all = Counter::new(0);

            // Normal deque pops newest first: `first` runs, then `second`.
            let second = {
                let done = done.clone();
                JobDesc::new(move |ctx| {
                    ctx.wait_for_jobs(Priority::Normal, [JobDesc::new(|_| {})]);
                    done.fetch_add(1, Ordering::SeqCst);
                })
            };
            ctx.add_jobs(Priority::Normal, [second], &all);
            ctx.add_jobs(Priority::Normal, [JobDesc::new(|_| {})], &first_done);

            // Runs before both and parks until `first` has finished.
            let waiter = {
                let done = done.clone();
                let first_done = first_done.clone();
                JobDesc::new(move |ctx| {
                    ctx.wait_for_counter(&first_done, 0);
                    done.fetch_add(1, Ordering::SeqCst);
                })
            };
            ctx.add_jobs(Priority::High, [waiter], &all);

            ctx.wait_for_counter(&all, 0);
            done.fetch_add(1, Ordering::SeqCst);
        })],
    );

    assert_eq!(finished.load(Ordering::SeqCst), 3);

    #[cfg(feature = "metrics")]
    {
        let metrics = job_system.metrics();
        assert_eq!(metrics.fibers_parked, 3, "{metrics:?}");
        assert_eq!(metrics.fibers_resumed, 3, "{metrics:?}");
    }
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_worker_waits_on_another_systems_counter() {
    let outer = common::job_system(2, 8);
    let inner = Arc::new(common::job_system(1, 8));
    let inner_runs = Arc::new(AtomicUsize::new(0));

    let system = inner.clone();
    let runs = inner_runs.clone();
    outer.wait_for_jobs(
        Priority::Normal,
        [JobDesc::new(move |ctx| {
            let counter = Counter::new(0);
            let jobs = (0..4).map(|_| {
                let runs = runs.clone();
                JobDesc::new(move |_| {
                    std::thread::sleep(Duration::from_millis(2));
                    runs.fetch_add(1, Ordering::SeqCst);
                })
            });
            system.add_jobs(Priority::Normal, jobs, &counter);

            // Not a worker of `system`, so this blocks the outer worker's
            // thread until the inner system wakes it.
            system.wait_for_counter(&counter, 0);
            assert_eq!(runs.load(Ordering::SeqCst), 4);
            assert!(ctx.worker().get() <= 2);
        })],
    );

    assert_eq!(inner_runs.load(Ordering::SeqCst), 4);
    outer.shutdown().expect("Shutdown failed");
    Arc::into_inner(inner)
        .expect("inner job system still shared")
        .shutdown()
        .expect("Shutdown failed");
}

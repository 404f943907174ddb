//! End-to-end behaviour of submission, waiting and shutdown.

mod common;

use fibersched::{Counter, JobDesc, JobSystemConfig, Priority};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[test]
fn test_ten_thousand_jobs_on_eight_workers() {
    let job_system = common::job_system(8, 32);
    let executed = Arc::new(AtomicUsize::new(0));
    let counter = Counter::new(0);

    let jobs = (0..10_000).map(|_| {
        let executed = executed.clone();
        JobDesc::new(move |_| {
            executed.fetch_add(1, Ordering::Relaxed);
        })
    });
    job_system.add_jobs(Priority::Normal, jobs, &counter);
    job_system.wait_for_counter(&counter, 0);

    assert_eq!(counter.value(), 0);
    assert_eq!(executed.load(Ordering::Relaxed), 10_000);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_no_job_runs_twice() {
    const JOBS: usize = 5_000;
    let job_system = common::job_system(4, 32);
    let runs: Arc<Vec<AtomicU8>> = Arc::new((0..JOBS).map(|_| AtomicU8::new(0)).collect());

    let jobs = (0..JOBS).map(|i| {
        let runs = runs.clone();
        JobDesc::new(move |_| {
            runs[i].fetch_add(1, Ordering::Relaxed);
        })
    });
    job_system.wait_for_jobs(Priority::Low, jobs);

    for (i, run) in runs.iter().enumerate() {
        assert_eq!(run.load(Ordering::Relaxed), 1, "job {i}");
    }
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_wait_returns_immediately_when_already_satisfied() {
    let job_system = common::job_system(1, 4);
    let counter = Counter::new(0);
    job_system.wait_for_counter(&counter, 0);
    job_system.wait_for_counter(&Counter::new(2), 2);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_wait_for_nonzero_target() {
    let job_system = common::job_system(2, 8);
    let open = Arc::new(AtomicBool::new(false));
    let gate = Counter::new(0);
    let counter = Counter::new(0);

    // The gate stays at 1 until `open` is set.
    let flag = open.clone();
    job_system.add_jobs(
        Priority::High,
        [JobDesc::new(move |_| {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        })],
        &gate,
    );

    let blocker = {
        let gate = gate.clone();
        JobDesc::new(move |ctx| ctx.wait_for_counter(&gate, 0))
    };
    let quick = (0..3).map(|_| JobDesc::new(|_| {}));
    job_system.add_jobs(Priority::Normal, quick.chain([blocker]), &counter);

    job_system.wait_for_counter(&counter, 1);
    assert_eq!(counter.value(), 1);
    assert_eq!(gate.value(), 1);

    open.store(true, Ordering::SeqCst);
    job_system.wait_for_counter(&counter, 0);
    assert!(gate.is_complete());
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_priorities_scanned_highest_first() {
    let job_system = common::job_system(1, 8);
    let order = Arc::new(Mutex::new(Vec::new()));

    let recorder = order.clone();
    job_system.wait_for_jobs(
        Priority::Normal,
        [JobDesc::new(move |ctx| {
            let children = Counter::new(0);
            for priority in [Priority::Low, Priority::Normal, Priority::High] {
                let jobs = (0..3).map(|_| {
                    let recorder = recorder.clone();
                    JobDesc::new(move |ctx| {
                        recorder.lock().unwrap().push(ctx.priority());
                    })
                });
                ctx.add_jobs(priority, jobs, &children);
            }
            ctx.wait_for_counter(&children, 0);
        })],
    );

    let expected: Vec<Priority> = Priority::HIGHEST_FIRST
        .iter()
        .flat_map(|&priority| [priority; 3])
        .collect();
    assert_eq!(*order.lock().unwrap(), expected);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_waiters_without_ready_swap() {
    common::init_test_logging();
    let job_system = fibersched::JobSystem::new(JobSystemConfig {
        workers: 2,
        fibers_per_worker: 64,
        stack_size: 128 * 1024,
        swap_to_ready_waiter: false,
        allow_oversubscription: true,
        ..JobSystemConfig::default()
    })
    .unwrap();

    let leaves = Arc::new(AtomicUsize::new(0));
    let roots = (0..4).map(|_| {
        let leaves = leaves.clone();
        JobDesc::new(move |ctx| {
            let jobs = (0..8).map(|_| {
                let leaves = leaves.clone();
                JobDesc::new(move |_| {
                    leaves.fetch_add(1, Ordering::SeqCst);
                })
            });
            ctx.wait_for_jobs(Priority::Normal, jobs);
        })
    });
    job_system.wait_for_jobs(Priority::Normal, roots);

    assert_eq!(leaves.load(Ordering::SeqCst), 32);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_counter_shared_across_batches() {
    let job_system = common::job_system(2, 8);
    let counter = Counter::new(0);

    job_system.add_jobs(Priority::Low, (0..10).map(|_| JobDesc::new(|_| {})), &counter);
    job_system.add_jobs(Priority::High, (0..10).map(|_| JobDesc::new(|_| {})), &counter);
    job_system.wait_for_counter(&counter, 0);

    assert_eq!(counter.value(), 0);
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_detached_jobs_complete() {
    let job_system = common::job_system(2, 8);
    let ran = Arc::new(AtomicUsize::new(0));

    let jobs = (0..20).map(|_| {
        let ran = ran.clone();
        JobDesc::new(move |_| {
            ran.fetch_add(1, Ordering::SeqCst);
        })
    });
    job_system.add_detached(Priority::Normal, jobs);

    assert!(common::wait_until(Duration::from_secs(5), || {
        ran.load(Ordering::SeqCst) == 20
    }));
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_shutdown_with_blocked_jobs() {
    let job_system = common::job_system(2, 8);
    let never = Counter::new(1);
    let started = Arc::new(AtomicUsize::new(0));

    let jobs = (0..2).map(|_| {
        let never = never.clone();
        let started = started.clone();
        JobDesc::new(move |ctx| {
            started.fetch_add(1, Ordering::SeqCst);
            ctx.wait_for_counter(&never, 0);
        })
    });
    job_system.add_detached(Priority::Normal, jobs);
    assert!(common::wait_until(Duration::from_secs(5), || {
        started.load(Ordering::SeqCst) == 2
    }));

    // Parked fibers are abandoned, not waited for.
    job_system.shutdown().expect("Shutdown failed");
}

#[test]
fn test_destroy_returns_without_joining() {
    let job_system = common::job_system(2, 8);
    job_system.wait_for_jobs(Priority::Normal, [JobDesc::new(|_| {})]);
    job_system.destroy();
}

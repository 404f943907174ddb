use fibersched::{Context, Counter, JobDesc, JobSystem, JobSystemConfig, Priority};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

fn main() -> ExitCode {
    println!("fibersched - Fiber-Based Job Scheduler\n");

    let config = match JobSystemConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let job_system = match JobSystem::new(config) {
        Ok(job_system) => job_system,
        Err(e) => {
            eprintln!("Failed to start job system: {e}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "Initialized job system with {} worker threads, {} fibers each\n",
        job_system.num_workers(),
        job_system.config().fibers_per_worker
    );

    // Example 1: Calibration - many tiny jobs on one counter
    println!("Example 1: Calibration");
    let num_jobs = 10_000;
    let start = Instant::now();
    let counter = Counter::new(0);
    let jobs = (0..num_jobs).map(|_| {
        JobDesc::new(|_| {
            let mut _x = 0;
            for i in 0..10 {
                _x += i;
            }
        })
    });
    job_system.add_jobs(Priority::Normal, jobs, &counter);
    job_system.wait_for_counter(&counter, 0);
    let duration = start.elapsed();
    println!("  Executed {num_jobs} jobs in {duration:?}");
    println!(
        "  Throughput: {:.2} jobs/second\n",
        num_jobs as f64 / duration.as_secs_f64()
    );

    // Example 2: Recursive fork - each job waits on its children
    println!("Example 2: Recursive fork (65 x 10 x 10 x 10)");
    let leaves = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let roots = (0..65).map(|_| {
        let leaves = leaves.clone();
        JobDesc::new(move |ctx| fork(ctx, 3, leaves))
    });
    job_system.wait_for_jobs(Priority::High, roots);
    println!(
        "  {} leaves in {:?} (expected 65000)\n",
        leaves.load(Ordering::SeqCst),
        start.elapsed()
    );

    // Example 3: Targeted dispatch - one job per worker
    println!("Example 3: schedule_jobs_on");
    let workers: Vec<_> = job_system.worker_ids().collect();
    let counter = Counter::new(0);
    let jobs = workers.iter().map(|&id| {
        JobDesc::new(move |ctx| {
            println!("  job for worker {id} ran on worker {}", ctx.worker());
        })
    });
    job_system.schedule_jobs_on(&workers, jobs, &counter);
    job_system.wait_for_counter(&counter, 0);
    println!();

    println!("Shutting down job system...");
    match job_system.shutdown() {
        Ok(()) => {
            println!("Done!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Shutdown error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn fork(ctx: &Context<'_>, depth: u32, leaves: Arc<AtomicUsize>) {
    if depth == 0 {
        leaves.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let children = (0..10).map(|_| {
        let leaves = leaves.clone();
        JobDesc::new(move |ctx| fork(ctx, depth - 1, leaves))
    });
    ctx.wait_for_jobs(Priority::Normal, children);
}

//! Throughput benchmark using criterion.
//!
//! Measures how fast batches of tiny jobs go through the scheduler, both when
//! submitted from outside (through the injectors) and when fanned out from
//! inside jobs (through the workers' own deques).

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fibersched::{Counter, JobDesc, JobSystem, JobSystemConfig, Priority};

const JOB_COUNT: usize = 100_000;
const FAN_OUT: usize = 100;

fn system(workers: usize) -> JobSystem {
    JobSystem::new(JobSystemConfig {
        workers,
        ..JobSystemConfig::default()
    })
    .expect("job system failed to start")
}

fn tiny_jobs(count: usize) -> impl Iterator<Item = JobDesc> {
    (0..count).map(|_| {
        JobDesc::new(|_| {
            std::hint::black_box(1 + 1);
        })
    })
}

/// Jobs submitted from the benchmark thread.
fn bench_external_submission(c: &mut Criterion) {
    let workers = num_cpus::get();
    let system = system(workers);

    let mut group = c.benchmark_group("throughput");
    group.throughput(Throughput::Elements(JOB_COUNT as u64));
    group.sample_size(10);

    group.bench_function(BenchmarkId::new("external_100k", workers), |b| {
        b.iter(|| {
            let counter = Counter::new(0);
            system.add_jobs(Priority::Normal, tiny_jobs(JOB_COUNT), &counter);
            system.wait_for_counter(&counter, 0);
        })
    });

    group.finish();
    system.shutdown().expect("Shutdown failed");
}

/// A root fans out to `FAN_OUT` jobs which each submit their share of leaves
/// to their own deque and wait for them.
fn bench_nested_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("throughput_scaling");
    group.throughput(Throughput::Elements(JOB_COUNT as u64));
    group.sample_size(10);

    for workers in [1, 2, 4, 8, 16, 32]
        .into_iter()
        .filter(|&w| w <= num_cpus::get())
    {
        let system = system(workers);

        group.bench_function(BenchmarkId::new("nested_100k", workers), |b| {
            b.iter(|| {
                let branches = (0..FAN_OUT).map(|_| {
                    JobDesc::new(|ctx| {
                        ctx.wait_for_jobs(Priority::Normal, tiny_jobs(JOB_COUNT / FAN_OUT));
                    })
                });
                system.wait_for_jobs(Priority::High, branches);
            })
        });

        system.shutdown().expect("Shutdown failed");
    }

    group.finish();
}

criterion_group!(benches, bench_external_submission, bench_nested_fan_out);
criterion_main!(benches);

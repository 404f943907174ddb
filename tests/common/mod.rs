//! Shared helpers for integration tests.

#![allow(dead_code)]

use fibersched::{JobSystem, JobSystemConfig};
use std::sync::Once;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging. `RUST_LOG` overrides the default `info` level.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("fibersched=info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .with_target(true)
            .with_ansi(false)
            .try_init();
    });
}

/// A job system for tests. Oversubscription is allowed so worker counts do
/// not depend on the machine.
pub fn job_system(workers: usize, fibers_per_worker: usize) -> JobSystem {
    init_test_logging();
    JobSystem::new(JobSystemConfig {
        workers,
        fibers_per_worker,
        stack_size: 128 * 1024,
        allow_oversubscription: true,
        ..JobSystemConfig::default()
    })
    .expect("job system failed to start")
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    true
}

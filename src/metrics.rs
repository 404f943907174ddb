#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::time::Instant;

/// Bumps a scheduler counter; compiles to nothing without the `metrics`
/// feature.
macro_rules! record {
    ($shared:expr, $field:ident) => {
        #[cfg(feature = "metrics")]
        {
            $shared
                .metrics
                .$field
                .fetch_add(1, ::std::sync::atomic::Ordering::Relaxed);
        }
    };
}

pub(crate) use record;

/// Optional performance counters for the job system.
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct Metrics {
    /// Jobs run to completion.
    pub jobs_executed: AtomicU64,
    /// Jobs taken from a worker's private queue.
    pub private_pops: AtomicU64,
    /// Jobs popped from a worker's own priority deques.
    pub local_pops: AtomicU64,
    /// Jobs taken from the off-worker injectors.
    pub injector_pops: AtomicU64,
    /// Jobs stolen from another worker.
    pub steals: AtomicU64,
    /// Fibers parked in `wait_for_counter`.
    pub fibers_parked: AtomicU64,
    /// Parked fibers switched back to.
    pub fibers_resumed: AtomicU64,
    /// Times a worker went to sleep.
    pub sleeps: AtomicU64,
    /// Time when metrics collection started.
    pub start_time: Instant,
}

#[cfg(feature = "metrics")]
impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_executed: AtomicU64::new(0),
            private_pops: AtomicU64::new(0),
            local_pops: AtomicU64::new(0),
            injector_pops: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            fibers_parked: AtomicU64::new(0),
            fibers_resumed: AtomicU64::new(0),
            sleeps: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Returns a snapshot of current metrics values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            private_pops: self.private_pops.load(Ordering::Relaxed),
            local_pops: self.local_pops.load(Ordering::Relaxed),
            injector_pops: self.injector_pops.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            fibers_parked: self.fibers_parked.load(Ordering::Relaxed),
            fibers_resumed: self.fibers_resumed.load(Ordering::Relaxed),
            sleeps: self.sleeps.load(Ordering::Relaxed),
            elapsed_seconds: self.start_time.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(feature = "metrics")]
impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub jobs_executed: u64,
    pub private_pops: u64,
    pub local_pops: u64,
    pub injector_pops: u64,
    pub steals: u64,
    pub fibers_parked: u64,
    pub fibers_resumed: u64,
    pub sleeps: u64,
    pub elapsed_seconds: f64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Calculates jobs per second throughput.
    pub fn jobs_per_second(&self) -> f64 {
        if self.elapsed_seconds > 0.0 {
            self.jobs_executed as f64 / self.elapsed_seconds
        } else {
            0.0
        }
    }

    /// Fibers currently parked across all workers.
    pub fn fibers_waiting(&self) -> i64 {
        self.fibers_parked as i64 - self.fibers_resumed as i64
    }
}

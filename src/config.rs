//! Job system configuration.
//!
//! Values come from [`JobSystemConfig::default`], optionally overridden by
//! `FIBERSCHED_*` environment variables through [`JobSystemConfig::from_env`].
//!
//! | Variable | Field |
//! |----------|-------|
//! | `FIBERSCHED_WORKERS` | `workers` |
//! | `FIBERSCHED_FIBERS_PER_WORKER` | `fibers_per_worker` |
//! | `FIBERSCHED_STACK_SIZE` | `stack_size` |
//! | `FIBERSCHED_QUEUE_CAPACITY` | `queue_capacity` |
//! | `FIBERSCHED_PRIVATE_QUEUE_CAPACITY` | `private_queue_capacity` |
//! | `FIBERSCHED_PINNING` | `pinning` (`none`, `linear`, `avoid-smt`) |
//! | `FIBERSCHED_SWAP_TO_READY_WAITER` | `swap_to_ready_waiter` |

use crate::error::JobSystemError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub const ENV_WORKERS: &str = "FIBERSCHED_WORKERS";
pub const ENV_FIBERS_PER_WORKER: &str = "FIBERSCHED_FIBERS_PER_WORKER";
pub const ENV_STACK_SIZE: &str = "FIBERSCHED_STACK_SIZE";
pub const ENV_QUEUE_CAPACITY: &str = "FIBERSCHED_QUEUE_CAPACITY";
pub const ENV_PRIVATE_QUEUE_CAPACITY: &str = "FIBERSCHED_PRIVATE_QUEUE_CAPACITY";
pub const ENV_PINNING: &str = "FIBERSCHED_PINNING";
pub const ENV_SWAP_TO_READY_WAITER: &str = "FIBERSCHED_SWAP_TO_READY_WAITER";

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Worker `i` on logical processor `i - 1`.
    Linear,
    /// Even-numbered logical processors only, keeping SMT siblings free.
    AvoidSmt,
}

impl PinningStrategy {
    /// Logical processor index for a zero-based worker index.
    pub fn core_index(self, worker_index: usize) -> Option<usize> {
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(worker_index),
            PinningStrategy::AvoidSmt => Some(worker_index * 2),
        }
    }
}

impl FromStr for PinningStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(PinningStrategy::None),
            "linear" => Ok(PinningStrategy::Linear),
            "avoid-smt" | "avoid_smt" | "avoidsmt" => Ok(PinningStrategy::AvoidSmt),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
    /// Number of worker threads. Default: one per hardware thread.
    pub workers: usize,
    /// Fibers pre-allocated per worker. A hard ceiling: one fiber is consumed
    /// for every job blocked in `wait_for_counter` on that worker, plus the
    /// one running the scheduler. Default: 128.
    pub fibers_per_worker: usize,
    /// Stack size of each fiber in bytes. Default: 256KB.
    pub stack_size: usize,
    /// Capacity of each per-priority work-stealing deque. Default: 4096.
    pub queue_capacity: usize,
    /// Capacity of each worker's private queue. Default: 256.
    pub private_queue_capacity: usize,
    pub pinning: PinningStrategy,
    /// When a fiber blocks and another parked fiber on the same worker is
    /// already runnable, switch straight to it instead of taking a fresh
    /// fiber from the pool. Default: true.
    pub swap_to_ready_waiter: bool,
    /// Permit more workers than hardware threads. Default: false.
    pub allow_oversubscription: bool,
}

impl Default for JobSystemConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            fibers_per_worker: 128,
            stack_size: 256 * 1024,
            queue_capacity: 4096,
            private_queue_capacity: 256,
            pinning: PinningStrategy::None,
            swap_to_ready_waiter: true,
            allow_oversubscription: false,
        }
    }
}

impl JobSystemConfig {
    /// Defaults with `FIBERSCHED_*` environment overrides applied.
    pub fn from_env() -> Result<Self, JobSystemError> {
        let mut config = Self::default();
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value. Variables it returns `None` for are left alone.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), JobSystemError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_WORKERS) {
            self.workers = parse(ENV_WORKERS, &val)?;
        }
        if let Some(val) = lookup(ENV_FIBERS_PER_WORKER) {
            self.fibers_per_worker = parse(ENV_FIBERS_PER_WORKER, &val)?;
        }
        if let Some(val) = lookup(ENV_STACK_SIZE) {
            self.stack_size = parse(ENV_STACK_SIZE, &val)?;
        }
        if let Some(val) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = parse(ENV_QUEUE_CAPACITY, &val)?;
        }
        if let Some(val) = lookup(ENV_PRIVATE_QUEUE_CAPACITY) {
            self.private_queue_capacity = parse(ENV_PRIVATE_QUEUE_CAPACITY, &val)?;
        }
        if let Some(val) = lookup(ENV_PINNING) {
            self.pinning = parse(ENV_PINNING, &val)?;
        }
        if let Some(val) = lookup(ENV_SWAP_TO_READY_WAITER) {
            self.swap_to_ready_waiter = parse_bool(ENV_SWAP_TO_READY_WAITER, &val)?;
        }
        Ok(())
    }

    /// Checks the configuration against the machine it will run on.
    pub fn validate(&self) -> Result<(), JobSystemError> {
        if self.workers == 0 {
            return Err(JobSystemError::NoWorkers);
        }
        let available = num_cpus::get();
        if self.workers > available && !self.allow_oversubscription {
            return Err(JobSystemError::TooManyWorkers {
                requested: self.workers,
                available,
            });
        }
        if self.fibers_per_worker == 0 {
            return Err(JobSystemError::NoFibers);
        }
        if self.queue_capacity == 0 || self.private_queue_capacity == 0 {
            return Err(JobSystemError::InvalidQueueCapacity);
        }
        Ok(())
    }
}

fn parse<T: FromStr>(var: &'static str, val: &str) -> Result<T, JobSystemError> {
    val.trim().parse().map_err(|_| JobSystemError::InvalidEnv {
        var,
        value: val.to_string(),
    })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, JobSystemError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(JobSystemError::InvalidEnv {
            var,
            value: val.to_string(),
        }),
    }
}

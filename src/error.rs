//! Errors reported while building or tearing down a job system.
//!
//! Only setup and teardown can fail recoverably. Scheduler invariant
//! violations at run time (fiber pool exhaustion, queue overflow) abort the
//! process instead.

use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobSystemError {
    #[error("a job system needs at least one worker")]
    NoWorkers,

    #[error("{requested} workers requested but only {available} hardware threads are available")]
    TooManyWorkers { requested: usize, available: usize },

    #[error("each worker needs at least one fiber")]
    NoFibers,

    #[error("queue capacity must be non-zero")]
    InvalidQueueCapacity,

    #[error("failed to allocate fiber stack: {0}")]
    FiberStack(#[source] io::Error),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("worker failed to start: {0}")]
    WorkerStartup(String),

    #[error("{0} worker thread(s) panicked")]
    WorkersPanicked(usize),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
}

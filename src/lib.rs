//! # fibersched - Fiber-Based Job Scheduler
//!
//! A cooperative job system in the style of the fiber schedulers used by game
//! engines. A fixed set of worker threads each multiplex a bounded pool of
//! stackful fibers; jobs that wait on other jobs park their fiber instead of
//! blocking the thread, so the worker keeps running other work.
//!
//! ## Architecture
//!
//! - **Fibers**: `corosensei` coroutines with their own stacks, switched
//!   symmetrically by the worker that owns them
//! - **Queues**: per worker, one Chase-Lev work-stealing deque per
//!   [`Priority`] and a private queue for jobs aimed at that worker
//! - **Counters**: shared atomic counters tracking how many jobs of a batch
//!   are still outstanding
//! - **Worker Threads**: OS threads running the scheduler loop: own queues,
//!   then runnable parked fibers, then stealing, then sleeping
//!
//! ## Example
//!
//! ```no_run
//! use fibersched::{Counter, JobDesc, JobSystem, Priority};
//!
//! let job_system = JobSystem::with_workers(64, 4).unwrap();
//!
//! let counter = Counter::new(0);
//! let jobs = (0..16).map(|i| {
//!     JobDesc::new(move |ctx| {
//!         println!("job {i} on worker {}", ctx.worker());
//!     })
//! });
//! job_system.add_jobs(Priority::Normal, jobs, &counter);
//! job_system.wait_for_counter(&counter, 0);
//! ```

pub mod config;
pub mod context;
pub mod counter;
pub mod deque;
pub mod error;
pub mod fiber;
pub mod fiber_pool;
pub mod job;
pub mod job_system;
pub mod metrics;
pub mod ring_queue;
mod sleep;
mod sync;
pub mod wait_list;
pub mod worker;

pub use config::{JobSystemConfig, PinningStrategy};
pub use context::Context;
pub use counter::Counter;
pub use error::JobSystemError;
pub use job::{JobDesc, Priority};
pub use job_system::JobSystem;
#[cfg(feature = "metrics")]
pub use metrics::MetricsSnapshot;
pub use worker::{WorkerId, current_worker};

//! Context type for safe access to job system capabilities from within jobs.

use crate::counter::Counter;
use crate::fiber::{self, FlsKey};
use crate::job::{JobDesc, Priority};
use crate::job_system::Shared;
use crate::worker::WorkerId;

/// Context provided to every running job.
///
/// It gives a job the same submission and waiting operations as
/// [`JobSystem`](crate::JobSystem), plus where and at what priority the job
/// is running.
pub struct Context<'a> {
    shared: &'a Shared,
    worker: WorkerId,
    priority: Priority,
}

impl<'a> Context<'a> {
    pub(crate) fn new(shared: &'a Shared, worker: WorkerId, priority: Priority) -> Self {
        Context {
            shared,
            worker,
            priority,
        }
    }

    /// The worker running this job.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// The priority this job was submitted at.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn num_workers(&self) -> usize {
        self.shared.num_workers()
    }

    /// Submits child jobs to this worker's queues.
    pub fn add_jobs<I>(&self, priority: Priority, jobs: I, counter: &Counter)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.shared.add_jobs(priority, jobs, counter);
    }

    /// Submits jobs without a counter (fire-and-forget).
    pub fn add_detached<I>(&self, priority: Priority, jobs: I)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.shared.add_detached(priority, jobs);
    }

    /// Sends job `i` to the private queue of `workers[i]`.
    pub fn schedule_jobs_on<I>(&self, workers: &[WorkerId], jobs: I, counter: &Counter)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.shared.schedule_jobs_on(workers, jobs, counter);
    }

    /// Runs `jobs` and suspends this job until they have all finished.
    pub fn wait_for_jobs<I>(&self, priority: Priority, jobs: I)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.shared.wait_for_jobs(priority, jobs);
    }

    /// Suspends this job until `counter.value() <= target`. The worker keeps
    /// running other jobs meanwhile.
    pub fn wait_for_counter(&self, counter: &Counter, target: i64) {
        self.shared.wait_for_counter(counter, target);
    }

    /// Calls `f` with the context of the job running on this fiber, for code
    /// that was not handed one. Returns `None` outside a job.
    pub fn with_current<R, F>(f: F) -> Option<R>
    where
        F: FnOnce(&Context<'_>) -> R,
    {
        let ptr = fiber::get_fls(FlsKey::CONTEXT) as *const Context<'_>;
        // SAFETY: the slot holds either 0 or a pointer to the context of the
        // job running on this fiber, which outlives the job's body.
        let ctx = unsafe { ptr.as_ref() }?;
        Some(f(ctx))
    }
}

impl std::fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("worker", &self.worker)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

//! High-level job system interface.
//!
//! The JobSystem is the primary entry point for scheduling and managing
//! parallel work. It owns the worker threads, accepts batches of jobs tracked
//! by a shared [`Counter`], and lets callers wait for those counters from
//! either a worker fiber or an ordinary thread.

use crate::config::JobSystemConfig;
use crate::counter::Counter;
use crate::deque;
use crate::error::JobSystemError;
use crate::fiber;
use crate::job::{Job, JobDesc, Priority};
#[cfg(feature = "metrics")]
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::sleep::Sleep;
use crate::worker::{self, WorkerId, WorkerQueues, fatal};
use crossbeam::deque::Injector;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// State shared by the workers and every handle that submits work.
pub(crate) struct Shared {
    pub(crate) config: JobSystemConfig,
    /// Indexed by [`WorkerId::index`].
    pub(crate) workers: Vec<WorkerQueues>,
    /// Submissions from threads that are not workers, one per priority.
    pub(crate) injectors: [Injector<Job>; Priority::COUNT],
    pub(crate) sleep: Sleep,
    pub(crate) exit: AtomicBool,
    #[cfg(feature = "metrics")]
    pub(crate) metrics: Metrics,
}

impl Shared {
    pub(crate) fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn add_jobs<I>(&self, priority: Priority, jobs: I, counter: &Counter)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        let jobs: Vec<JobDesc> = jobs.into_iter().collect();
        if jobs.is_empty() {
            return;
        }
        // Raised before anything is visible to workers, so no waiter can see
        // the batch as finished early.
        counter.add(jobs.len() as i64);
        self.submit(
            jobs.into_iter()
                .map(|desc| desc.into_job(priority, Some(counter.clone()))),
        );
    }

    pub(crate) fn add_detached<I>(&self, priority: Priority, jobs: I)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.submit(jobs.into_iter().map(|desc| desc.into_job(priority, None)));
    }

    /// Workers of this system push to their own deques; everyone else goes
    /// through the injectors.
    fn submit<I>(&self, jobs: I)
    where
        I: Iterator<Item = Job>,
    {
        let mut submitted = 0usize;
        match worker::local().filter(|local| local.belongs_to(self)) {
            Some(local) => {
                for job in jobs {
                    local.push_local(job);
                    submitted += 1;
                }
            }
            None => {
                for job in jobs {
                    self.injectors[job.priority().index()].push(job);
                    submitted += 1;
                }
            }
        }
        if submitted > 0 {
            self.sleep.wake_all();
        }
    }

    pub(crate) fn schedule_jobs_on<I>(&self, workers: &[WorkerId], jobs: I, counter: &Counter)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        let jobs: Vec<JobDesc> = jobs.into_iter().collect();
        assert_eq!(
            workers.len(),
            jobs.len(),
            "schedule_jobs_on needs exactly one worker id per job"
        );
        for id in workers {
            assert!(
                id.index() < self.workers.len(),
                "worker {id} does not exist (job system has {} workers)",
                self.workers.len()
            );
        }
        if jobs.is_empty() {
            return;
        }

        counter.add(jobs.len() as i64);
        for (id, desc) in workers.iter().zip(jobs) {
            let job = desc.into_job(Priority::High, Some(counter.clone()));
            if self.workers[id.index()].private.enqueue(job).is_err() {
                fatal!(
                    "private queue of worker {id} overflowed (capacity {})",
                    self.workers[id.index()].private.capacity()
                );
            }
        }
        self.sleep.wake_all();
    }

    pub(crate) fn wait_for_jobs<I>(&self, priority: Priority, jobs: I)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        let counter = Counter::new(0);
        self.add_jobs(priority, jobs, &counter);
        self.wait_for_counter(&counter, 0);
    }

    pub(crate) fn wait_for_counter(&self, counter: &Counter, target: i64) {
        if counter.is_satisfied(target) {
            return;
        }

        if fiber::in_fiber() {
            if let Some(local) = worker::local().filter(|local| local.belongs_to(self)) {
                worker::park_until(local, counter, target);
                return;
            }
        }

        // Off-worker (or a worker of another system): block the thread.
        loop {
            let epoch = self.sleep.epoch();
            if counter.is_satisfied(target) {
                return;
            }
            self.sleep.sleep(epoch);
        }
    }

    fn signal_exit(&self) {
        self.exit.store(true, Ordering::SeqCst);
        self.sleep.wake_all();
    }
}

/// The main job system managing worker threads and job execution.
///
/// Dropping a `JobSystem` signals the workers to exit and detaches them, like
/// [`JobSystem::destroy`]. Use [`JobSystem::shutdown`] to wait for them.
pub struct JobSystem {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl JobSystem {
    /// Starts the workers described by `config`.
    ///
    /// Returns once every worker has pinned itself, allocated its fiber pool
    /// and entered its scheduler loop.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid, a thread cannot be spawned or a
    /// worker cannot allocate its fiber stacks.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use fibersched::{JobSystem, JobSystemConfig};
    ///
    /// let job_system = JobSystem::new(JobSystemConfig::default()).unwrap();
    /// ```
    pub fn new(config: JobSystemConfig) -> Result<Self, JobSystemError> {
        config.validate()?;

        let workers = config.workers;
        let mut queues = Vec::with_capacity(workers);
        let mut owners = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (deques, stealers): (Vec<_>, Vec<_>) = (0..Priority::COUNT)
                .map(|_| deque::new(config.queue_capacity))
                .unzip();
            queues.push(WorkerQueues::new(config.private_queue_capacity, stealers));
            owners.push(deques);
        }

        let shared = Arc::new(Shared {
            config,
            workers: queues,
            injectors: std::array::from_fn(|_| Injector::new()),
            sleep: Sleep::new(),
            exit: AtomicBool::new(false),
            #[cfg(feature = "metrics")]
            metrics: Metrics::new(),
        });

        let (ready_tx, ready_rx) = crossbeam::channel::bounded(workers);
        let mut threads = Vec::with_capacity(workers);
        for (index, deques) in owners.into_iter().enumerate() {
            let id = WorkerId::from_index(index);
            let worker_shared = Arc::clone(&shared);
            let ready = ready_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("fibersched-worker-{id}"))
                .spawn(move || worker::worker_main(worker_shared, id, deques, ready));

            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    stop_workers(&shared, threads);
                    return Err(JobSystemError::Spawn(err));
                }
            }
        }
        drop(ready_tx);

        for _ in 0..workers {
            let startup = ready_rx.recv().unwrap_or_else(|_| {
                Err(JobSystemError::WorkerStartup(
                    "worker exited before reporting readiness".to_string(),
                ))
            });
            if let Err(err) = startup {
                error!(%err, "job system startup failed");
                stop_workers(&shared, threads);
                return Err(err);
            }
        }

        info!(
            workers,
            fibers_per_worker = shared.config.fibers_per_worker,
            stack_size = shared.config.stack_size,
            "job system started"
        );
        Ok(JobSystem { shared, threads })
    }

    /// Creates a job system with `workers` threads, each owning
    /// `fibers_per_worker` fibers; everything else is default.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use fibersched::JobSystem;
    ///
    /// let job_system = JobSystem::with_workers(64, 4).unwrap();
    /// assert_eq!(job_system.num_workers(), 4);
    /// ```
    pub fn with_workers(fibers_per_worker: usize, workers: usize) -> Result<Self, JobSystemError> {
        JobSystem::new(JobSystemConfig {
            workers,
            fibers_per_worker,
            ..JobSystemConfig::default()
        })
    }

    /// Submits `jobs` at `priority`, adding their number to `counter`. Each
    /// job decrements `counter` once it has run.
    ///
    /// From a worker of this system the jobs go to that worker's own queue,
    /// from anywhere else to a shared injector queue.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use fibersched::{Counter, JobDesc, JobSystem, Priority};
    ///
    /// let job_system = JobSystem::with_workers(32, 2).unwrap();
    /// let counter = Counter::new(0);
    /// job_system.add_jobs(
    ///     Priority::Normal,
    ///     (0..4).map(|i| JobDesc::new(move |_| println!("job {i}"))),
    ///     &counter,
    /// );
    /// job_system.wait_for_counter(&counter, 0);
    /// ```
    pub fn add_jobs<I>(&self, priority: Priority, jobs: I, counter: &Counter)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.shared.add_jobs(priority, jobs, counter);
    }

    /// Submits jobs nobody will wait for.
    pub fn add_detached<I>(&self, priority: Priority, jobs: I)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.shared.add_detached(priority, jobs);
    }

    /// Sends job `i` to the private queue of `workers[i]`. Private queues are
    /// checked before any other queue and are never stolen from.
    ///
    /// # Panics
    ///
    /// Panics if the number of ids and jobs differ or an id is out of range.
    pub fn schedule_jobs_on<I>(&self, workers: &[WorkerId], jobs: I, counter: &Counter)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.shared.schedule_jobs_on(workers, jobs, counter);
    }

    /// Runs `jobs` at `priority` and returns once all of them have finished.
    pub fn wait_for_jobs<I>(&self, priority: Priority, jobs: I)
    where
        I: IntoIterator<Item = JobDesc>,
    {
        self.shared.wait_for_jobs(priority, jobs);
    }

    /// Returns once `counter.value() <= target`.
    ///
    /// On a worker fiber this parks the fiber and keeps the worker busy with
    /// other jobs; on any other thread it blocks.
    pub fn wait_for_counter(&self, counter: &Counter, target: i64) {
        self.shared.wait_for_counter(counter, target);
    }

    /// Returns the number of worker threads in the system.
    pub fn num_workers(&self) -> usize {
        self.shared.num_workers()
    }

    /// Ids of every worker, in order.
    pub fn worker_ids(
        &self,
    ) -> impl DoubleEndedIterator<Item = WorkerId> + ExactSizeIterator + use<> {
        (0..self.shared.num_workers()).map(WorkerId::from_index)
    }

    pub fn config(&self) -> &JobSystemConfig {
        &self.shared.config
    }

    /// Id of the worker running the caller, if any.
    pub fn current_worker() -> Option<WorkerId> {
        worker::current_worker()
    }

    /// Returns a snapshot of the scheduler counters.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Tells the workers to exit and detaches them without waiting.
    ///
    /// Workers finish the job they are running and then stop; queued jobs
    /// are dropped unrun.
    pub fn destroy(self) {
        drop(self);
    }

    /// Tells the workers to exit and joins them.
    ///
    /// Returns an error with the number of workers that panicked.
    pub fn shutdown(mut self) -> Result<(), JobSystemError> {
        let threads = std::mem::take(&mut self.threads);
        match stop_workers(&self.shared, threads) {
            0 => Ok(()),
            panicked => Err(JobSystemError::WorkersPanicked(panicked)),
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            debug!(workers = self.threads.len(), "detaching workers");
            self.shared.signal_exit();
            self.threads.clear();
        }
    }
}

impl std::fmt::Debug for JobSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystem")
            .field("workers", &self.shared.num_workers())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

/// Signals exit and joins `threads`, returning how many panicked.
fn stop_workers(shared: &Shared, threads: Vec<JoinHandle<()>>) -> usize {
    shared.signal_exit();
    let mut panicked = 0;
    for handle in threads {
        let name = handle.thread().name().unwrap_or("worker").to_string();
        if handle.join().is_err() {
            panicked += 1;
            error!(thread = %name, "worker panicked");
            eprintln!("{name} panicked during execution");
        }
    }
    if panicked == 0 {
        info!("job system shut down");
    }
    panicked
}

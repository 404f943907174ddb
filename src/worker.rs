//! Worker threads and the scheduler loop.
//!
//! Each worker thread converts itself into a fiber host, pre-allocates its
//! fiber pool and then runs one fiber from that pool. Every fiber's entry
//! point is [`scheduler_loop`], so whichever fiber is current on a worker is
//! the one pulling and running jobs. A fiber that blocks inside a job parks
//! itself on the worker's wait list and hands the thread to another fiber,
//! which simply carries on scheduling.
//!
//! Worker-local state ([`LocalState`]) lives on the worker thread's stack for
//! the thread's whole life and is published through a thread-local pointer.
//! It is only touched from that thread, and no `RefCell` borrow of it is ever
//! held across a fiber switch.

use crate::context::Context;
use crate::counter::Counter;
use crate::deque::{self, Stealer};
use crate::error::JobSystemError;
use crate::fiber::{self, FlsKey, ThreadFiber};
use crate::fiber_pool::FiberPool;
use crate::job::{Job, Priority};
use crate::job_system::Shared;
use crate::metrics::record;
use crate::ring_queue::RingQueue;
use crate::wait_list::{ParkedFiber, WaitList};
use crossbeam::channel::Sender;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, trace, warn};

/// Logs and aborts. Used for exhausted fibers and overflowing queues, which
/// leave the scheduler with no way to make progress.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let message = format!($($arg)*);
        tracing::error!("{message}");
        eprintln!("fibersched: fatal: {message}");
        std::process::abort()
    }};
}

pub(crate) use fatal;

/// Identity of a worker thread, `1..=N`.
///
/// There is no id 0: code running outside any worker has no `WorkerId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Returns `None` for 0.
    pub fn new(id: usize) -> Option<WorkerId> {
        (id != 0).then_some(WorkerId(id))
    }

    pub(crate) fn from_index(index: usize) -> WorkerId {
        WorkerId(index + 1)
    }

    pub fn get(self) -> usize {
        self.0
    }

    /// Zero-based index into per-worker tables.
    pub fn index(self) -> usize {
        self.0 - 1
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The parts of a worker other threads can reach.
pub(crate) struct WorkerQueues {
    /// Direct dispatch from `schedule_jobs_on`; many producers, one consumer.
    pub(crate) private: RingQueue<Job>,
    /// One per priority, indexed by [`Priority::index`].
    pub(crate) stealers: Vec<Stealer<Job>>,
}

impl WorkerQueues {
    pub(crate) fn new(private_capacity: usize, stealers: Vec<Stealer<Job>>) -> Self {
        WorkerQueues {
            private: RingQueue::new(private_capacity),
            stealers,
        }
    }
}

/// State owned by one worker thread.
pub(crate) struct LocalState {
    pub(crate) shared: Arc<Shared>,
    pub(crate) id: WorkerId,
    /// Owner ends of this worker's deques, indexed by [`Priority::index`].
    deques: Vec<deque::Worker<Job>>,
    pool: RefCell<FiberPool>,
    wait_list: RefCell<WaitList>,
    last_victim: Cell<usize>,
}

thread_local! {
    static LOCAL: Cell<*const LocalState> = const { Cell::new(std::ptr::null()) };
}

/// The calling worker's state, or `None` off worker threads.
///
/// The pointee outlives every fiber on its thread: it is created before the
/// thread starts hosting fibers and unpublished after the last one is gone.
pub(crate) fn local() -> Option<&'static LocalState> {
    let ptr = LOCAL.get();
    // SAFETY: see above; only ever dereferenced on the owning thread.
    unsafe { ptr.as_ref() }
}

/// Id of the worker running the caller, or `None` when called from a thread
/// that is not a job system worker.
pub fn current_worker() -> Option<WorkerId> {
    local().map(|local| local.id)
}

impl LocalState {
    pub(crate) fn belongs_to(&self, shared: &Shared) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.shared), shared)
    }

    /// Pushes onto this worker's own deque for `job`'s priority.
    pub(crate) fn push_local(&self, job: Job) {
        let index = job.priority().index();
        if self.deques[index].push(job).is_err() {
            fatal!(
                "{:?} queue of worker {} overflowed (capacity {})",
                Priority::HIGHEST_FIRST[index],
                self.id,
                self.deques[index].capacity()
            );
        }
    }

    /// Private queue first, then own deques from highest priority down.
    fn next_local_job(&self) -> Option<Job> {
        let queues = &self.shared.workers[self.id.index()];
        if let Some(job) = queues.private.dequeue() {
            record!(self.shared, private_pops);
            return Some(job);
        }

        let job = self.deques.iter().find_map(deque::Worker::pop)?;
        record!(self.shared, local_pops);
        Some(job)
    }

    /// Steals one job. For each priority, highest first, the injector is
    /// drained before other workers' deques, which are visited round-robin
    /// starting at the last successful victim.
    fn steal(&self) -> Option<Job> {
        let shared = &*self.shared;
        let workers = shared.workers.len();
        let me = self.id.index();

        for priority in Priority::HIGHEST_FIRST {
            let index = priority.index();

            let job = loop {
                let steal = shared.injectors[index].steal();
                if !steal.is_retry() {
                    break steal.success();
                }
            };
            if let Some(job) = job {
                record!(shared, injector_pops);
                trace!(worker = self.id.get(), ?priority, "took job from injector");
                return Some(job);
            }

            let start = self.last_victim.get();
            for offset in 0..workers {
                let victim = (start + offset) % workers;
                if victim == me {
                    continue;
                }
                let job = loop {
                    let steal = shared.workers[victim].stealers[index].steal();
                    if !steal.is_retry() {
                        break steal.success();
                    }
                    std::hint::spin_loop();
                };
                if let Some(job) = job {
                    self.last_victim.set(victim);
                    record!(shared, steals);
                    trace!(
                        worker = self.id.get(),
                        victim = victim + 1,
                        ?priority,
                        "stole job"
                    );
                    return Some(job);
                }
            }
        }
        None
    }

    fn take_ready_waiter(&self) -> Option<Box<fiber::Fiber>> {
        self.wait_list.borrow_mut().take_ready()
    }

    /// Runs `job` on the current fiber with its [`Context`] published in
    /// fiber-local storage.
    fn run_job(&self, job: Job) {
        let ctx = Context::new(&self.shared, self.id, job.priority());
        let previous = fiber::get_fls(FlsKey::CONTEXT);
        fiber::set_fls(FlsKey::CONTEXT, &ctx as *const Context<'_> as usize);

        let released = job.execute(&ctx);

        fiber::set_fls(FlsKey::CONTEXT, previous);
        record!(self.shared, jobs_executed);
        if released {
            // Parked fibers and off-worker waiters re-check their counters.
            self.shared.sleep.wake_all();
        }
    }
}

/// Entry point of every fiber.
fn scheduler_loop() {
    let Some(local) = local() else {
        fatal!("scheduler fiber started off a worker thread");
    };
    let shared = &*local.shared;

    loop {
        // The epoch is read before the exit flag and before scanning, so a
        // wake that lands anywhere after this line keeps us from sleeping.
        let epoch = shared.sleep.epoch();
        if shared.exit.load(Ordering::SeqCst) {
            return;
        }

        if let Some(job) = local.next_local_job() {
            local.run_job(job);
            continue;
        }

        if let Some(ready) = local.take_ready_waiter() {
            record!(shared, fibers_resumed);
            debug!(worker = local.id.get(), fiber = ready.id().get(), "resuming parked fiber");
            fiber::switch_to_fiber(ready, move |me| local.pool.borrow_mut().push(me));
            continue;
        }

        if let Some(job) = local.steal() {
            local.run_job(job);
            continue;
        }

        record!(shared, sleeps);
        trace!(worker = local.id.get(), "sleeping");
        shared.sleep.sleep(epoch);
    }
}

/// Blocks the current fiber until `counter.value() <= target`, running other
/// work on this worker in the meantime.
pub(crate) fn park_until(local: &'static LocalState, counter: &Counter, target: i64) {
    let shared = &*local.shared;

    while !counter.is_satisfied(target) {
        let ready = if shared.config.swap_to_ready_waiter {
            local.take_ready_waiter()
        } else {
            None
        };

        let next = match ready {
            Some(fiber) => {
                record!(shared, fibers_resumed);
                fiber
            }
            None => {
                let fresh = local.pool.borrow_mut().pop();
                match fresh {
                    Some(fiber) => fiber,
                    None => fatal!(
                        "fiber pool of worker {} exhausted ({} fibers all blocked)",
                        local.id,
                        local.pool.borrow().capacity()
                    ),
                }
            }
        };

        record!(shared, fibers_parked);
        debug!(
            worker = local.id.get(),
            fiber = fiber::current_fiber().map(|id| id.get()),
            target,
            "parking fiber"
        );

        let counter = counter.clone();
        fiber::switch_to_fiber(next, move |me| {
            local.wait_list.borrow_mut().park(ParkedFiber {
                fiber: me,
                counter,
                target,
            });
        });
    }
}

/// Body of a worker thread. Reports startup success or failure on `ready`
/// and returns once the job system's exit flag is observed.
pub(crate) fn worker_main(
    shared: Arc<Shared>,
    id: WorkerId,
    deques: Vec<deque::Worker<Job>>,
    ready: Sender<Result<(), JobSystemError>>,
) {
    let config = &shared.config;

    if let Some(core) = config.pinning.core_index(id.index()) {
        match core_affinity::get_core_ids().and_then(|ids| ids.get(core).copied()) {
            Some(core_id) => {
                if !core_affinity::set_for_current(core_id) {
                    warn!(worker = id.get(), core, "failed to pin worker");
                }
            }
            None => warn!(worker = id.get(), core, "no such core, running unpinned"),
        }
    }

    let pool = match FiberPool::new(config.fibers_per_worker, config.stack_size, || scheduler_loop) {
        Ok(pool) => pool,
        Err(err) => {
            let _ = ready.send(Err(JobSystemError::FiberStack(err)));
            return;
        }
    };

    let state = LocalState {
        wait_list: RefCell::new(WaitList::new(pool.capacity())),
        pool: RefCell::new(pool),
        shared: Arc::clone(&shared),
        id,
        deques,
        last_victim: Cell::new(id.get() % shared.workers.len()),
    };
    LOCAL.set(&state);

    let thread_fiber = ThreadFiber::convert();
    let first = state.pool.borrow_mut().pop();
    let Some(first) = first else {
        let _ = ready.send(Err(JobSystemError::NoFibers));
        LOCAL.set(std::ptr::null());
        return;
    };

    let _ = ready.send(Ok(()));
    drop(ready);
    info!(worker = id.get(), fibers = config.fibers_per_worker, "worker started");

    drop(thread_fiber.run(first));

    // Idle fibers suspended inside the scheduler loop resume straight into the
    // exit check and return.
    loop {
        let idle = state.pool.borrow_mut().pop();
        let Some(idle) = idle else { break };
        if idle.started() && !idle.is_done() {
            drop(thread_fiber.run(idle));
        }
    }

    // Parked fibers are in the middle of a job that will never finish; their
    // stacks are leaked rather than unwound.
    let parked: Vec<ParkedFiber> = state.wait_list.borrow_mut().drain().collect();
    if !parked.is_empty() {
        warn!(worker = id.get(), parked = parked.len(), "abandoning parked fibers at exit");
    }
    for entry in parked {
        std::mem::forget(entry.fiber);
    }

    thread_fiber.into_thread();
    LOCAL.set(std::ptr::null());
    info!(worker = id.get(), "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_is_one_based() {
        assert_eq!(WorkerId::new(0), None);
        let id = WorkerId::new(3).unwrap();
        assert_eq!(id.get(), 3);
        assert_eq!(id.index(), 2);
        assert_eq!(WorkerId::from_index(2), id);
        assert_eq!(id.to_string(), "3");
    }

    #[test]
    fn test_no_current_worker_off_worker_threads() {
        assert_eq!(current_worker(), None);
        assert!(local().is_none());
    }
}

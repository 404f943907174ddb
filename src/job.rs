//! Job definitions and execution logic.
//!
//! A [`JobDesc`] is what callers hand to the job system; the system turns it
//! into a [`Job`] by attaching the batch counter and the priority it was
//! submitted at.

use crate::context::Context;
use crate::counter::Counter;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Job priority. Each level has its own queue on every worker; higher levels
/// are always scanned first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub const COUNT: usize = 3;

    /// Scan order used by the scheduler.
    pub const HIGHEST_FIRST: [Priority; Priority::COUNT] =
        [Priority::High, Priority::Normal, Priority::Low];

    /// Queue index; 0 is scanned first.
    pub fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

type Work = Box<dyn FnOnce(&Context<'_>) + Send + 'static>;

/// A unit of work as submitted by callers.
pub struct JobDesc {
    work: Work,
}

impl JobDesc {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(&Context<'_>) + Send + 'static,
    {
        JobDesc {
            work: Box::new(work),
        }
    }

    pub(crate) fn into_job(self, priority: Priority, counter: Option<Counter>) -> Job {
        Job {
            work: self.work,
            counter,
            priority,
        }
    }
}

impl<F> From<F> for JobDesc
where
    F: FnOnce(&Context<'_>) + Send + 'static,
{
    fn from(work: F) -> Self {
        JobDesc::new(work)
    }
}

impl std::fmt::Debug for JobDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDesc").finish_non_exhaustive()
    }
}

/// A queued job: the work, the counter it releases and its priority.
pub struct Job {
    work: Work,
    counter: Option<Counter>,
    priority: Priority,
}

impl Job {
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Runs the job and then decrements its counter, exactly once, even if the
    /// job panicked. Returns whether a counter was released.
    pub(crate) fn execute(self, ctx: &Context<'_>) -> bool {
        let Job { work, counter, .. } = self;

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| work(ctx))) {
            tracing::error!(
                worker = ctx.worker().get(),
                "job panicked: {}",
                panic_message(payload.as_ref())
            );
        }

        match counter {
            Some(counter) => {
                counter.decrement();
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("priority", &self.priority)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_scan_order() {
        let indices: Vec<_> = Priority::HIGHEST_FIRST.iter().map(|p| p.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_job_keeps_priority_and_counter() {
        let counter = Counter::new(1);
        let job = JobDesc::new(|_| {}).into_job(Priority::High, Some(counter.clone()));
        assert_eq!(job.priority(), Priority::High);
        assert_eq!(counter.value(), 1);
    }

    #[test]
    fn test_panic_message_variants() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u32);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}

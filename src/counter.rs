//! Counter-based synchronization for job completion tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Number of outstanding jobs in a batch.
///
/// Every job submitted against a counter holds a clone of it, so the counter
/// stays alive until the last of those jobs has run. A counter is mutated only
/// by the job system: submission adds the batch size, each finished job
/// subtracts one. Waiting is done through `wait_for_counter`.
#[derive(Clone, Default)]
pub struct Counter {
    inner: Arc<AtomicI64>,
}

impl Counter {
    /// Creates a counter starting at `initial`.
    pub fn new(initial: i64) -> Self {
        Counter {
            inner: Arc::new(AtomicI64::new(initial)),
        }
    }

    /// Current value.
    pub fn value(&self) -> i64 {
        self.inner.load(Ordering::Acquire)
    }

    /// True once the value has dropped to `target` or below.
    pub fn is_satisfied(&self, target: i64) -> bool {
        self.value() <= target
    }

    /// True once every tracked job has finished.
    pub fn is_complete(&self) -> bool {
        self.is_satisfied(0)
    }

    /// Adds `n` outstanding jobs. Called before the jobs are published.
    pub(crate) fn add(&self, n: i64) {
        self.inner.fetch_add(n, Ordering::AcqRel);
    }

    /// Marks one job finished and returns the new value.
    ///
    /// Release ordering makes the job's side effects visible to whoever
    /// observes the decrement.
    pub(crate) fn decrement(&self) -> i64 {
        self.inner.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// Whether `self` and `other` are handles to the same counter.
    pub fn same_as(&self, other: &Counter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Counter").field(&self.value()).finish()
    }
}

use crate::fiber::Fiber;
use std::io;

/// A bounded stack of idle fibers.
/// Note: This pool is owned by a single worker and never shared.
pub struct FiberPool {
    pool: Vec<Box<Fiber>>,
    capacity: usize,
}

impl FiberPool {
    /// Pre-allocates `capacity` fibers, each running `make_entry()` when first
    /// switched to.
    pub fn new<F, E>(capacity: usize, stack_size: usize, mut make_entry: F) -> io::Result<Self>
    where
        F: FnMut() -> E,
        E: FnOnce() + 'static,
    {
        let mut pool = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            pool.push(Fiber::new(stack_size, make_entry())?);
        }
        Ok(FiberPool { pool, capacity })
    }

    /// Takes an idle fiber, or `None` when the pool is exhausted.
    pub fn pop(&mut self) -> Option<Box<Fiber>> {
        self.pool.pop()
    }

    /// Returns a fiber to the pool.
    ///
    /// # Panics
    ///
    /// Panics if the pool is already full, which means a fiber that did not
    /// come from this pool was pushed.
    pub fn push(&mut self, fiber: Box<Fiber>) {
        assert!(self.pool.len() < self.capacity, "fiber pool overflow");
        self.pool.push(fiber);
    }

    /// Number of idle fibers.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

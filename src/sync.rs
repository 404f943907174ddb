//! Atomics and cells used by the lock-free queues.
//!
//! Under `--cfg loom` these resolve to the `loom` model-checker types so the
//! queues can be explored exhaustively; otherwise they are the std types.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{AtomicIsize, AtomicUsize, Ordering, fence};

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering, fence};

// loom must see a yield in every retry loop or it explores it forever.
#[cfg(loom)]
pub(crate) use loom::thread::yield_now as spin_loop;

#[cfg(not(loom))]
pub(crate) use std::hint::spin_loop;

/// `UnsafeCell` with the closure-based access API `loom` requires.
#[cfg(loom)]
#[derive(Debug)]
pub(crate) struct UnsafeCell<T>(loom::cell::UnsafeCell<T>);

#[cfg(loom)]
impl<T> UnsafeCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(loom::cell::UnsafeCell::new(value))
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
        self.0.with(f)
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        self.0.with_mut(f)
    }
}

#[cfg(not(loom))]
#[derive(Debug)]
pub(crate) struct UnsafeCell<T>(std::cell::UnsafeCell<T>);

#[cfg(not(loom))]
impl<T> UnsafeCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self(std::cell::UnsafeCell::new(value))
    }

    #[inline(always)]
    pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
        f(self.0.get())
    }

    #[inline(always)]
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        f(self.0.get())
    }
}

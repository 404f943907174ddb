//! Bounded Chase-Lev work-stealing deque.
//!
//! The owning [`Worker`] pushes and pops at the bottom (LIFO); any number of
//! [`Stealer`]s take from the top (FIFO). `bottom` is only ever written by the
//! owner. `top` is advanced by CAS, both by thieves and by the owner when it
//! pops the last remaining element, which is the one race the deque has to
//! settle.
//!
//! Orderings follow Lê, Pop, Cohen and Zappa Nardelli, "Correct and Efficient
//! Work-Stealing for Weak Memory Models" (PPoPP 2013), minus the resize path.

use crate::sync::{AtomicIsize, Ordering, UnsafeCell, fence};
use crossbeam::utils::CachePadded;
use std::cell::Cell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::Arc;

/// Result of a steal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal<T> {
    /// The deque was empty.
    Empty,
    /// An item was taken.
    Success(T),
    /// Lost a race with the owner or another thief; trying again may succeed.
    Retry,
}

impl<T> Steal<T> {
    pub fn is_empty(&self) -> bool {
        matches!(self, Steal::Empty)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }

    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(item) => Some(item),
            _ => None,
        }
    }
}

struct Inner<T> {
    top: CachePadded<AtomicIsize>,
    bottom: CachePadded<AtomicIsize>,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
}

impl<T> Inner<T> {
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn slot(&self, index: isize) -> &UnsafeCell<MaybeUninit<T>> {
        &self.buffer[index as usize & self.mask]
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        let top = self.top.load(Ordering::Relaxed);
        let bottom = self.bottom.load(Ordering::Relaxed);
        for i in top..bottom {
            self.slot(i)
                .with_mut(|p| unsafe { (*p).assume_init_drop() });
        }
    }
}

/// Owner end of the deque. Not `Sync`: only one thread may push and pop.
pub struct Worker<T> {
    inner: Arc<Inner<T>>,
    _not_sync: PhantomData<Cell<()>>,
}

unsafe impl<T: Send> Send for Worker<T> {}

/// Thief end of the deque.
pub struct Stealer<T> {
    inner: Arc<Inner<T>>,
}

unsafe impl<T: Send> Send for Stealer<T> {}
unsafe impl<T: Send> Sync for Stealer<T> {}

impl<T> Clone for Stealer<T> {
    fn clone(&self) -> Self {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Creates a deque holding at most `capacity` items (rounded up to a power of
/// two).
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn new<T>(capacity: usize) -> (Worker<T>, Stealer<T>) {
    assert!(capacity > 0, "deque capacity must be non-zero");
    let capacity = capacity.next_power_of_two();

    let buffer = (0..capacity)
        .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
        .collect();

    let inner = Arc::new(Inner {
        top: CachePadded::new(AtomicIsize::new(0)),
        bottom: CachePadded::new(AtomicIsize::new(0)),
        buffer,
        mask: capacity - 1,
    });

    (
        Worker {
            inner: Arc::clone(&inner),
            _not_sync: PhantomData,
        },
        Stealer { inner },
    )
}

impl<T> Worker<T> {
    /// Pushes onto the bottom, handing the item back if the deque is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let inner = &*self.inner;
        let b = inner.bottom.load(Ordering::Relaxed);
        let t = inner.top.load(Ordering::Acquire);

        if b.wrapping_sub(t) >= inner.capacity() as isize {
            return Err(item);
        }

        inner.slot(b).with_mut(|p| unsafe {
            (*p).write(item);
        });
        fence(Ordering::Release);
        inner.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
        Ok(())
    }

    /// Pops the most recently pushed item.
    pub fn pop(&self) -> Option<T> {
        let inner = &*self.inner;
        let b = inner.bottom.load(Ordering::Relaxed).wrapping_sub(1);
        inner.bottom.store(b, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let t = inner.top.load(Ordering::Relaxed);

        if t > b {
            // Already empty; restore.
            inner.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
            return None;
        }

        if t == b {
            // Last item: thieves may be going for it too.
            let won = inner
                .top
                .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            inner.bottom.store(b.wrapping_add(1), Ordering::Relaxed);
            return if won {
                Some(inner.slot(b).with(|p| unsafe { (*p).assume_init_read() }))
            } else {
                None
            };
        }

        Some(inner.slot(b).with(|p| unsafe { (*p).assume_init_read() }))
    }

    /// Creates another thief handle for this deque.
    pub fn stealer(&self) -> Stealer<T> {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    pub fn len(&self) -> usize {
        let b = self.inner.bottom.load(Ordering::Relaxed);
        let t = self.inner.top.load(Ordering::Relaxed);
        b.wrapping_sub(t).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Stealer<T> {
    /// Takes the oldest item from the top of the deque.
    pub fn steal(&self) -> Steal<T> {
        let inner = &*self.inner;
        let t = inner.top.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let b = inner.bottom.load(Ordering::Acquire);

        if t >= b {
            return Steal::Empty;
        }

        // Speculative copy; it only becomes ours if the CAS succeeds.
        let item: MaybeUninit<T> = inner.slot(t).with(|p| unsafe { std::ptr::read(p) });

        if inner
            .top
            .compare_exchange(t, t.wrapping_add(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return Steal::Retry;
        }

        Steal::Success(unsafe { item.assume_init() })
    }

    pub fn len(&self) -> usize {
        let t = self.inner.top.load(Ordering::Acquire);
        let b = self.inner.bottom.load(Ordering::Acquire);
        b.wrapping_sub(t).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> std::fmt::Debug for Worker<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker").field("len", &self.len()).finish()
    }
}

impl<T> std::fmt::Debug for Stealer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stealer").field("len", &self.len()).finish()
    }
}

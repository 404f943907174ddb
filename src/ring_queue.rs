//! Bounded lock-free FIFO ring.
//!
//! Each slot carries a stamp combining a lap number and the slot index. Head
//! and tail are each a single atomic `(lap, index)` cursor, so one CAS both
//! claims a slot and tells a full ring apart from an empty one.
//!
//! Used as every worker's private queue: any thread may enqueue through
//! `schedule_jobs_on`, only the owning worker dequeues.

use crate::sync::{AtomicUsize, Ordering, UnsafeCell, fence, spin_loop};
use crossbeam::utils::CachePadded;
use std::mem::MaybeUninit;

struct Slot<T> {
    /// `lap | index` when empty and writable in that lap, `lap | index + 1`
    /// once a value has been written.
    stamp: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// A fixed-capacity lock-free queue.
pub struct RingQueue<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    slots: Box<[Slot<T>]>,
    capacity: usize,
    /// Smallest power of two strictly greater than `capacity`; the low bits
    /// of a cursor are the index, the high bits the lap.
    one_lap: usize,
}

unsafe impl<T: Send> Send for RingQueue<T> {}
unsafe impl<T: Send> Sync for RingQueue<T> {}

impl<T> RingQueue<T> {
    /// Creates a ring holding at most `capacity` items.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring queue capacity must be non-zero");

        let slots = (0..capacity)
            .map(|i| Slot {
                stamp: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        RingQueue {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            slots,
            capacity,
            one_lap: (capacity + 1).next_power_of_two(),
        }
    }

    /// Appends `value`, handing it back if the ring is full.
    ///
    /// Never reports full while a slot is only held up by a consumer that has
    /// claimed it but not finished reading: the call spins until that
    /// consumer releases the slot. It returns `Err` only when every slot holds
    /// an unclaimed value.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let index = tail & (self.one_lap - 1);
            let lap = tail & !(self.one_lap - 1);
            let next = if index + 1 < self.capacity {
                tail + 1
            } else {
                lap.wrapping_add(self.one_lap)
            };

            let slot = &self.slots[index];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == tail {
                match self.tail.compare_exchange_weak(
                    tail,
                    next,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        slot.value.with_mut(|p| unsafe {
                            (*p).write(value);
                        });
                        slot.stamp.store(tail + 1, Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => {
                        tail = current;
                        spin_loop();
                    }
                }
            } else if stamp.wrapping_add(self.one_lap) == tail + 1 {
                // Slot still holds last lap's value.
                fence(Ordering::SeqCst);
                let head = self.head.load(Ordering::Relaxed);
                if head.wrapping_add(self.one_lap) == tail {
                    return Err(value);
                }
                // A consumer claimed it but has not released it yet.
                spin_loop();
                tail = self.tail.load(Ordering::Relaxed);
            } else {
                spin_loop();
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Removes the oldest item, or returns `None` if the ring is empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let index = head & (self.one_lap - 1);
            let lap = head & !(self.one_lap - 1);

            let slot = &self.slots[index];
            let stamp = slot.stamp.load(Ordering::Acquire);

            if stamp == head + 1 {
                let next = if index + 1 < self.capacity {
                    head + 1
                } else {
                    lap.wrapping_add(self.one_lap)
                };

                match self.head.compare_exchange_weak(
                    head,
                    next,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = slot.value.with(|p| unsafe { (*p).assume_init_read() });
                        slot.stamp
                            .store(head.wrapping_add(self.one_lap), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => {
                        head = current;
                        spin_loop();
                    }
                }
            } else if stamp == head {
                fence(Ordering::SeqCst);
                let tail = self.tail.load(Ordering::Relaxed);
                if tail == head {
                    return None;
                }
                // A producer claimed it but has not published yet.
                spin_loop();
                head = self.head.load(Ordering::Relaxed);
            } else {
                spin_loop();
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Maximum number of items the ring can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items currently queued. Only a snapshot under concurrency.
    pub fn len(&self) -> usize {
        loop {
            let tail = self.tail.load(Ordering::SeqCst);
            let head = self.head.load(Ordering::SeqCst);

            if self.tail.load(Ordering::SeqCst) == tail {
                let hix = head & (self.one_lap - 1);
                let tix = tail & (self.one_lap - 1);

                return if hix < tix {
                    tix - hix
                } else if hix > tix {
                    self.capacity - hix + tix
                } else if tail == head {
                    0
                } else {
                    self.capacity
                };
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }
}

impl<T> Drop for RingQueue<T> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}

impl<T> std::fmt::Debug for RingQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingQueue")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

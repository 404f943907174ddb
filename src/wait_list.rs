//! Fibers parked on a counter.

use crate::counter::Counter;
use crate::fiber::Fiber;

/// A fiber blocked until `counter.value() <= target`.
pub struct ParkedFiber {
    pub fiber: Box<Fiber>,
    pub counter: Counter,
    pub target: i64,
}

impl ParkedFiber {
    pub fn is_ready(&self) -> bool {
        self.counter.is_satisfied(self.target)
    }
}

/// Per-worker list of parked fibers. Only the owning worker touches it.
pub struct WaitList {
    entries: Vec<ParkedFiber>,
    capacity: usize,
}

impl WaitList {
    pub fn new(capacity: usize) -> Self {
        WaitList {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// # Panics
    ///
    /// Panics if the list is full. Capacity equals the fiber count, so this
    /// means a fiber was parked twice.
    pub fn park(&mut self, entry: ParkedFiber) {
        assert!(self.entries.len() < self.capacity, "wait list overflow");
        self.entries.push(entry);
    }

    /// Removes and returns the longest-parked fiber whose counter has reached
    /// its target.
    pub fn take_ready(&mut self) -> Option<Box<Fiber>> {
        let index = self.entries.iter().position(ParkedFiber::is_ready)?;
        Some(self.entries.remove(index).fiber)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Empties the list, handing back every parked entry.
    pub fn drain(&mut self) -> impl Iterator<Item = ParkedFiber> + '_ {
        self.entries.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber() -> Box<Fiber> {
        Fiber::new(64 * 1024, || {}).unwrap()
    }

    #[test]
    fn test_take_ready_respects_targets() {
        let mut list = WaitList::new(4);
        let blocked = Counter::new(2);
        let done = Counter::new(0);

        list.park(ParkedFiber {
            fiber: fiber(),
            counter: blocked.clone(),
            target: 0,
        });
        let ready = fiber();
        let ready_id = ready.id();
        list.park(ParkedFiber {
            fiber: ready,
            counter: done,
            target: 0,
        });

        assert_eq!(list.take_ready().map(|f| f.id()), Some(ready_id));
        assert!(list.take_ready().is_none());
        assert_eq!(list.len(), 1);

        // One decrement leaves it above its target.
        blocked.decrement();
        assert!(list.take_ready().is_none());
        list.drain().for_each(drop);
        assert!(list.is_empty());
    }

    #[test]
    fn test_oldest_ready_first() {
        let mut list = WaitList::new(4);
        let counter = Counter::new(0);
        let first = fiber();
        let first_id = first.id();

        list.park(ParkedFiber {
            fiber: first,
            counter: counter.clone(),
            target: 0,
        });
        list.park(ParkedFiber {
            fiber: fiber(),
            counter,
            target: 0,
        });

        assert_eq!(list.take_ready().unwrap().id(), first_id);
    }
}

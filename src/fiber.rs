//! Stackful fibers.
//!
//! Fibers are `corosensei` coroutines that never yield values to their
//! caller. Instead, a fiber that wants to run another fiber suspends with a
//! handoff request; the [`ThreadFiber`] driving the OS thread parks the
//! outgoing fiber wherever the request says and resumes the target. From the
//! fibers' point of view this is a symmetric switch, and ownership of the
//! outgoing fiber only moves once it has fully suspended.
//!
//! Each fiber also carries a small array of pointer-sized fiber-local slots
//! which travel with it across switches.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};
use std::cell::Cell;
use std::io;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Number of fiber-local storage slots per fiber.
pub const FLS_SLOTS: usize = 16;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);
// Slot 0 is reserved for the job context.
static NEXT_FLS_SLOT: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

impl FiberId {
    pub fn get(self) -> u64 {
        self.0
    }
}

type Stash = Box<dyn FnOnce(Box<Fiber>)>;

/// What a fiber asks the thread fiber to do when it suspends.
struct Handoff {
    target: Box<Fiber>,
    stash: Stash,
}

/// A stackful execution context with its own stack.
pub struct Fiber {
    id: FiberId,
    coroutine: Coroutine<(), Handoff, (), DefaultStack>,
    /// Set on first entry; valid for as long as the coroutine exists.
    yielder: Cell<*const Yielder<(), Handoff>>,
    locals: [Cell<usize>; FLS_SLOTS],
}

thread_local! {
    static CURRENT: Cell<*mut Fiber> = const { Cell::new(ptr::null_mut()) };
    static HOSTED: Cell<bool> = const { Cell::new(false) };
}

impl Fiber {
    /// Creates a fiber that runs `entry` the first time it is switched to.
    /// When `entry` returns, [`ThreadFiber::run`] returns the fiber.
    pub fn new<F>(stack_size: usize, entry: F) -> io::Result<Box<Fiber>>
    where
        F: FnOnce() + 'static,
    {
        let stack = DefaultStack::new(stack_size)?;
        let coroutine = Coroutine::with_stack(
            stack,
            move |yielder: &Yielder<(), Handoff>, _: ()| {
                let me = CURRENT.get();
                debug_assert!(!me.is_null());
                // SAFETY: the thread fiber publishes the fiber it resumes.
                unsafe { (*me).yielder.set(yielder as *const _) };
                entry();
            },
        );

        Ok(Box::new(Fiber {
            id: FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed)),
            coroutine,
            yielder: Cell::new(ptr::null()),
            locals: std::array::from_fn(|_| Cell::new(0)),
        }))
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Whether the fiber has been entered at least once.
    pub fn started(&self) -> bool {
        self.coroutine.started()
    }

    /// Whether the fiber's entry function has returned.
    pub fn is_done(&self) -> bool {
        self.coroutine.done()
    }
}

impl std::fmt::Debug for Fiber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("started", &self.started())
            .field("done", &self.is_done())
            .finish()
    }
}

/// Marks an OS thread as the host of a fiber world and drives it.
///
/// Creating one is the `convert_thread_to_fiber` step; dropping it (or calling
/// [`ThreadFiber::into_thread`]) converts back.
pub struct ThreadFiber {
    _not_send: PhantomData<*const ()>,
}

impl ThreadFiber {
    /// Converts the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if the thread is already hosting fibers.
    pub fn convert() -> ThreadFiber {
        assert!(!HOSTED.replace(true), "thread is already hosting fibers");
        ThreadFiber {
            _not_send: PhantomData,
        }
    }

    /// Runs `first` and every fiber it switches to until one of them returns
    /// from its entry function; that fiber is handed back.
    pub fn run(&self, first: Box<Fiber>) -> Box<Fiber> {
        assert!(CURRENT.get().is_null(), "ThreadFiber::run called from inside a fiber");

        let mut current = first;
        loop {
            let raw: *mut Fiber = &mut *current;
            CURRENT.set(raw);
            // SAFETY: `raw` points into `current`, which stays boxed and
            // untouched by this frame until the coroutine suspends or returns.
            let result = unsafe { (*raw).coroutine.resume(()) };
            CURRENT.set(ptr::null_mut());

            match result {
                CoroutineResult::Yield(Handoff { target, stash }) => {
                    stash(current);
                    current = target;
                }
                CoroutineResult::Return(()) => return current,
            }
        }
    }

    /// Converts the thread back (`convert_fiber_to_thread`).
    pub fn into_thread(self) {}
}

impl Drop for ThreadFiber {
    fn drop(&mut self) {
        HOSTED.set(false);
    }
}

/// Suspends the running fiber and resumes `target`.
///
/// Once the caller has fully suspended, `stash` is called on the thread fiber
/// with the caller's box; whoever ends up holding it may switch back to it
/// later, at which point this call returns.
///
/// # Panics
///
/// Panics if called outside a fiber.
pub fn switch_to_fiber<S>(target: Box<Fiber>, stash: S)
where
    S: FnOnce(Box<Fiber>) + 'static,
{
    let me = CURRENT.get();
    assert!(!me.is_null(), "switch_to_fiber called outside of a fiber");

    // SAFETY: `me` is the running fiber, whose yielder was recorded on entry.
    let yielder = unsafe { &*(*me).yielder.get() };
    yielder.suspend(Handoff {
        target,
        stash: Box::new(stash),
    });
}

/// Id of the fiber running on this thread, if any.
pub fn current_fiber() -> Option<FiberId> {
    let me = CURRENT.get();
    if me.is_null() {
        None
    } else {
        // SAFETY: non-null only while that fiber is running.
        Some(unsafe { (*me).id })
    }
}

/// True when called from inside a fiber.
pub fn in_fiber() -> bool {
    !CURRENT.get().is_null()
}

/// True when this thread has been converted with [`ThreadFiber::convert`].
pub fn is_fiber_thread() -> bool {
    HOSTED.get()
}

/// Handle to one fiber-local storage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlsKey(usize);

impl FlsKey {
    pub(crate) const CONTEXT: FlsKey = FlsKey(0);

    /// Reserves a new slot (`make_FLS`). Slots are never released.
    ///
    /// # Panics
    ///
    /// Panics once all [`FLS_SLOTS`] slots are taken.
    #[allow(clippy::new_without_default)]
    pub fn new() -> FlsKey {
        let slot = NEXT_FLS_SLOT.fetch_add(1, Ordering::Relaxed);
        assert!(slot < FLS_SLOTS, "fiber-local storage slots exhausted");
        FlsKey(slot)
    }
}

/// Reads the running fiber's value for `key`; 0 if unset or outside a fiber.
pub fn get_fls(key: FlsKey) -> usize {
    let me = CURRENT.get();
    if me.is_null() {
        return 0;
    }
    // SAFETY: non-null only while that fiber is running on this thread.
    unsafe { (&(*me).locals)[key.0].get() }
}

/// Sets the running fiber's value for `key`.
///
/// # Panics
///
/// Panics if called outside a fiber.
pub fn set_fls(key: FlsKey, value: usize) {
    let me = CURRENT.get();
    assert!(!me.is_null(), "set_fls called outside of a fiber");
    // SAFETY: as in `get_fls`.
    unsafe { (&(*me).locals)[key.0].set(value) };
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Stackful fibers on top of the platform back-end.
//!
//! A [`Fiber`] owns a stack, a primed context and its entry closure. A
//! [`ThreadFiber`] is the OS thread's own context, converted in place.
//! Switching is always *from the running fiber*: the source context comes
//! from the per-thread record, never from the caller.
//!
//! Lifecycle: `Ready -> Running -> (Suspended <-> Running)* -> Finished`,
//! and `reset`/`restart` take a finished fiber back to `Ready` on the same
//! stack.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::current;
use crate::error::FiberError;
use crate::platform::{Native, Platform};

type NativeContext = <Native as Platform>::Context;
type NativeStack = <Native as Platform>::Stack;
type Entry = Box<dyn FnMut() + Send + 'static>;

/// Fiber lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Primed, entry not started yet.
    Ready = 0,
    /// Executing on some OS thread.
    Running = 1,
    /// Switched away from; resumable.
    Suspended = 2,
    /// Entry returned. Needs `reset`/`restart` before it can run again.
    Finished = 3,
    /// Context being re-primed.
    Priming = 4,
}

impl FiberState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Suspended,
            3 => Self::Finished,
            _ => Self::Priming,
        }
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FiberState::Ready => "ready",
            FiberState::Running => "running",
            FiberState::Suspended => "suspended",
            FiberState::Finished => "finished",
            FiberState::Priming => "priming",
        };
        f.write_str(s)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Heap-pinned fiber state. Contexts point into it, so it never moves.
pub(crate) struct Inner {
    id: u64,
    ctx: UnsafeCell<NativeContext>,
    entry: UnsafeCell<Option<Entry>>,
    pub(crate) state: AtomicU8,
}

// `ctx` and `entry` are only touched by the thread that holds the fiber in
// `Running` or `Priming`, and those states are claimed with a CAS.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

impl Inner {
    fn boxed(ctx: NativeContext, entry: Option<Entry>, state: FiberState) -> Box<Self> {
        Box::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            ctx: UnsafeCell::new(ctx),
            entry: UnsafeCell::new(entry),
            state: AtomicU8::new(state as u8),
        })
    }

    fn state(&self) -> FiberState {
        FiberState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Ready | Suspended -> Running`.
    fn claim(&self) -> Result<(), FiberState> {
        self.transition(&[FiberState::Ready, FiberState::Suspended], FiberState::Running)
    }

    fn transition(&self, from: &[FiberState], to: FiberState) -> Result<(), FiberState> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                from.contains(&FiberState::from_u8(s)).then_some(to as u8)
            })
            .map(|_| ())
            .map_err(FiberState::from_u8)
    }

    fn arg(&self) -> *mut c_void {
        self as *const Self as *mut c_void
    }
}

/// A fiber with its own stack.
pub struct Fiber {
    inner: Box<Inner>,
    stack: NativeStack,
}

impl Fiber {
    /// Allocate a `stack_size`-byte stack and prime it to run `entry`.
    ///
    /// `entry` may return; the fiber then becomes `Finished` and control
    /// goes back to the thread fiber of whichever thread ran it last.
    pub fn new<F>(stack_size: usize, entry: F) -> Result<Self, FiberError>
    where
        F: FnMut() + Send + 'static,
    {
        if stack_size == 0 {
            return Err(FiberError::ZeroStackSize);
        }
        let stack = Native::allocate_stack(stack_size).map_err(|source| {
            FiberError::StackAllocation {
                size: stack_size,
                source,
            }
        })?;
        let fiber = Self {
            inner: Inner::boxed(
                Native::empty_context(),
                Some(Box::new(entry)),
                FiberState::Priming,
            ),
            stack,
        };
        fiber.prime()?;
        tracing::trace!(fiber = fiber.id(), stack = fiber.stack_size(), "fiber created");
        Ok(fiber)
    }

    /// Replace the entry closure and re-prime the context, reusing the
    /// stack. Only legal while `Ready` or `Finished`.
    pub fn reset<F>(&self, entry: F) -> Result<(), FiberError>
    where
        F: FnMut() + Send + 'static,
    {
        self.begin_priming()?;
        // SAFETY: `Priming` was claimed above, nobody else touches `entry`.
        unsafe { *self.inner.entry.get() = Some(Box::new(entry)) };
        self.prime()
    }

    /// Re-prime with the current entry closure.
    pub fn restart(&self) -> Result<(), FiberError> {
        self.begin_priming()?;
        self.prime()
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn state(&self) -> FiberState {
        self.inner.state()
    }

    /// Usable stack bytes (after page rounding on unix).
    pub fn stack_size(&self) -> usize {
        Native::stack_size(&self.stack)
    }

    fn begin_priming(&self) -> Result<(), FiberError> {
        self.inner
            .transition(&[FiberState::Ready, FiberState::Finished], FiberState::Priming)
            .map_err(|state| FiberError::Busy {
                id: self.id(),
                state,
            })
    }

    /// Requires `Priming`. Leaves the fiber `Ready`, or `Finished` on error.
    fn prime(&self) -> Result<(), FiberError> {
        let inner = &*self.inner;
        let primed =
            unsafe { Native::create_context(inner.ctx.get(), &self.stack, fiber_main, inner.arg()) };
        match primed {
            Ok(()) => {
                inner.state.store(FiberState::Ready as u8, Ordering::Release);
                Ok(())
            }
            Err(err) => {
                inner.state.store(FiberState::Finished as u8, Ordering::Release);
                Err(FiberError::Context(err))
            }
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("stack_size", &self.stack_size())
            .finish()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.inner.state() == FiberState::Running {
            fatal(format_args!("fiber {} dropped while running", self.inner.id));
        }
        unsafe { Native::destroy_context(self.inner.ctx.get_mut()) };
    }
}

/// The calling OS thread, converted into a fiber.
///
/// Other fibers hand control back here through [`yield_to_thread`]. Must
/// be dropped on its own thread while it is the running fiber.
pub struct ThreadFiber {
    inner: Box<Inner>,
    _not_send: PhantomData<*const ()>,
}

impl ThreadFiber {
    /// Convert the calling thread. Fails if it already runs as a fiber.
    pub fn convert() -> Result<Self, FiberError> {
        if !current::thread().is_null() {
            return Err(FiberError::AlreadyConverted);
        }
        let mut ctx = Native::empty_context();
        Native::convert_thread(&mut ctx).map_err(FiberError::ThreadConversion)?;
        let inner = Inner::boxed(ctx, None, FiberState::Running);
        current::install(&*inner);
        tracing::trace!(fiber = inner.id, "thread converted to fiber");
        Ok(Self {
            inner,
            _not_send: PhantomData,
        })
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }
}

impl fmt::Debug for ThreadFiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadFiber")
            .field("id", &self.id())
            .finish()
    }
}

impl Drop for ThreadFiber {
    fn drop(&mut self) {
        let me: *const Inner = &*self.inner;
        if !ptr::eq(current::running(), me) {
            fatal(format_args!(
                "thread fiber {} dropped while another fiber runs on its thread",
                self.inner.id
            ));
        }
        current::uninstall();
        unsafe { Native::revert_thread(self.inner.ctx.get_mut()) };
        tracing::trace!(fiber = self.inner.id, "thread fiber reverted");
    }
}

/// Switch from the running fiber to `target`.
///
/// Returns once some thread switches back to the fiber that called this.
/// Switching to the running fiber is a no-op.
///
/// # Panics
///
/// If this thread was never converted, or `target` is running elsewhere,
/// finished, or being re-primed. Nothing is switched in that case.
pub fn switch_to(target: &Fiber) {
    let from = current::running();
    assert!(
        !from.is_null(),
        "switch_to: thread has not been converted to a fiber"
    );
    let to: *const Inner = &*target.inner;
    if ptr::eq(from, to) {
        return;
    }
    if let Err(state) = target.inner.claim() {
        panic!("cannot switch to fiber {}: it is {}", target.id(), state);
    }
    unsafe { transfer(from, to, FiberState::Suspended) };
}

/// Switch from the running fiber back to this thread's own fiber.
///
/// No-op when called on the thread fiber itself.
pub fn yield_to_thread() {
    let to = current::thread();
    assert!(
        !to.is_null(),
        "yield_to_thread: thread has not been converted to a fiber"
    );
    let from = current::running();
    if ptr::eq(from, to) {
        return;
    }
    unsafe {
        if let Err(state) = (*to).claim() {
            fatal(format_args!("thread fiber {} is {}, expected suspended", (*to).id, state));
        }
        transfer(from, to, FiberState::Suspended);
    }
}

/// Id of the fiber executing on this thread, if the thread is converted.
pub fn current_fiber_id() -> Option<u64> {
    let running = current::running();
    if running.is_null() {
        None
    } else {
        Some(unsafe { (*running).id })
    }
}

/// Whether the calling thread has a live [`ThreadFiber`].
pub fn is_thread_converted() -> bool {
    !current::thread().is_null()
}

/// # Safety
///
/// `from` must be the running fiber of this thread and `to` must already
/// be claimed (`Running`) by the caller.
unsafe fn transfer(from: *const Inner, to: *const Inner, next: FiberState) {
    current::set_pending(from, next);
    current::set_running(to);
    Native::switch_context((*from).ctx.get(), (*to).ctx.get());
    current::complete_switch();
}

unsafe extern "C" fn fiber_main(arg: *mut c_void) -> ! {
    current::complete_switch();
    let inner = &*(arg as *const Inner);

    match (*inner.entry.get()).as_mut() {
        Some(entry) => {
            if panic::catch_unwind(AssertUnwindSafe(entry)).is_err() {
                fatal(format_args!("fiber {} entry panicked", inner.id));
            }
        }
        None => fatal(format_args!("fiber {} started without an entry", inner.id)),
    }

    let to = current::thread();
    if to.is_null() {
        fatal(format_args!("fiber {} finished on an unconverted thread", inner.id));
    }
    if let Err(state) = (*to).claim() {
        fatal(format_args!("thread fiber {} is {}, expected suspended", (*to).id, state));
    }
    transfer(inner, to, FiberState::Finished);
    fatal(format_args!("finished fiber {} was resumed", inner.id))
}

/// Log, then abort. For broken invariants that cannot unwind safely.
#[cold]
pub(crate) fn fatal(args: fmt::Arguments<'_>) -> ! {
    tracing::error!("{}", args);
    eprintln!("strand-fiber: fatal: {}", args);
    std::process::abort()
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-thread fiber records.
//!
//! Which fiber is executing, which fiber is the thread's own, and the
//! state to publish for the fiber we just left. Fibers migrate between OS
//! threads, so every access goes through an out-of-line function: a
//! thread-local address computed before a switch must never be reused
//! after it.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::Ordering;

use crate::fiber::{FiberState, Inner};

thread_local! {
    static THREAD: Cell<*const Inner> = const { Cell::new(ptr::null()) };
    static RUNNING: Cell<*const Inner> = const { Cell::new(ptr::null()) };
    static PENDING: Cell<Option<(*const Inner, FiberState)>> = const { Cell::new(None) };
}

#[inline(never)]
pub(crate) fn thread() -> *const Inner {
    THREAD.with(|t| t.get())
}

#[inline(never)]
pub(crate) fn running() -> *const Inner {
    RUNNING.with(|r| r.get())
}

#[inline(never)]
pub(crate) fn set_running(fiber: *const Inner) {
    RUNNING.with(|r| r.set(fiber));
}

/// Record `fiber` as both the thread fiber and the running one.
#[inline(never)]
pub(crate) fn install(fiber: *const Inner) {
    THREAD.with(|t| t.set(fiber));
    RUNNING.with(|r| r.set(fiber));
}

#[inline(never)]
pub(crate) fn uninstall() {
    THREAD.with(|t| t.set(ptr::null()));
    RUNNING.with(|r| r.set(ptr::null()));
    PENDING.with(|p| p.set(None));
}

/// Remember what `fiber` becomes once its registers are saved.
#[inline(never)]
pub(crate) fn set_pending(fiber: *const Inner, next: FiberState) {
    PENDING.with(|p| p.set(Some((fiber, next))));
}

/// Publish the state of the fiber this thread just switched away from.
///
/// Runs on the fiber that was switched to, so the previous fiber's
/// context is complete by the time anyone can observe it as resumable.
#[inline(never)]
pub(crate) fn complete_switch() {
    if let Some((prev, next)) = PENDING.with(|p| p.take()) {
        // SAFETY: `prev` was running until the switch that brought us here
        // and a running fiber is never freed; we touch it only this once.
        unsafe { (*prev).state.store(next as u8, Ordering::Release) };
    }
}

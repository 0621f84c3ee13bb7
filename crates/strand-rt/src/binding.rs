// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Process-wide scheduler binding.
//!
//! At most one scheduler is bound at a time. The registry holds a weak
//! reference only; it backs [`schedule_parallel`] and nothing else.

use std::ptr;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use crate::scheduler::{Scheduler, Shared};
use crate::sync::lock;
use crate::task::Task;

static BOUND: Mutex<Option<Weak<Shared>>> = Mutex::new(None);

pub(crate) fn bind(shared: &Arc<Shared>) {
    let mut slot = lock(&BOUND);
    assert!(slot.is_none(), "bind: a scheduler is already bound");
    *slot = Some(Arc::downgrade(shared));
    tracing::debug!("scheduler bound");
}

pub(crate) fn unbind(shared: &Arc<Shared>) {
    let mut slot = lock(&BOUND);
    let is_ours = slot
        .as_ref()
        .is_some_and(|weak| ptr::eq(weak.as_ptr(), Arc::as_ptr(shared)));
    assert!(is_ours, "unbind: this scheduler is not the bound one");
    *slot = None;
    tracing::debug!("scheduler unbound");
}

pub(crate) fn bound() -> Option<Arc<Shared>> {
    lock(&BOUND).as_ref().and_then(Weak::upgrade)
}

/// Called when `shared` is being destroyed. Dropping a bound scheduler
/// is a contract violation: clear the slot, then panic unless already
/// unwinding.
pub(crate) fn forget(shared: &Shared) {
    let mut slot = lock(&BOUND);
    let was_bound = slot
        .as_ref()
        .is_some_and(|weak| ptr::eq(weak.as_ptr(), shared));
    if !was_bound {
        return;
    }
    *slot = None;
    drop(slot);
    if thread::panicking() {
        tracing::error!("bound scheduler dropped during unwinding");
    } else {
        panic!("scheduler dropped while still bound; call unbind first");
    }
}

/// Enqueue `f` on the bound scheduler.
///
/// # Panics
///
/// If no scheduler is bound.
pub fn schedule_parallel<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    Scheduler::bound().enqueue(Task::new(f));
}

/// Enqueue `f(args)` on the bound scheduler, capturing `args` now.
///
/// # Panics
///
/// If no scheduler is bound.
pub fn schedule_parallel_with<F, A>(f: F, args: A)
where
    F: FnOnce(A) + Send + 'static,
    A: Send + 'static,
{
    Scheduler::bound().enqueue(Task::bind(f, args));
}

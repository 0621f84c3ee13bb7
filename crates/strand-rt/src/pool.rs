// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fiber arena and idle list.
//!
//! The arena owns every fiber the scheduler ever created and only grows.
//! Workers address fibers by [`FiberId`]; the idle list holds the ids of
//! fibers that are not executing and may be handed out again.

use std::sync::{Arc, Mutex};

use strand_fiber::Fiber;

use crate::sync::lock;

/// Index of a fiber in its scheduler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FiberId(usize);

pub(crate) struct FiberArena {
    fibers: Mutex<Vec<Arc<Fiber>>>,
    idle: Mutex<Vec<FiberId>>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self {
            fibers: Mutex::new(Vec::new()),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Take ownership of a freshly created fiber. It starts out checked
    /// out, not idle.
    pub fn insert(&self, fiber: Fiber) -> FiberId {
        let mut fibers = lock(&self.fibers);
        fibers.push(Arc::new(fiber));
        FiberId(fibers.len() - 1)
    }

    pub fn get(&self, id: FiberId) -> Arc<Fiber> {
        lock(&self.fibers)[id.0].clone()
    }

    pub fn pop_idle(&self) -> Option<FiberId> {
        lock(&self.idle).pop()
    }

    /// Return a fiber to the idle list. The caller must have switched
    /// away from it already.
    pub fn release(&self, id: FiberId) {
        lock(&self.idle).push(id);
    }

    pub fn created(&self) -> usize {
        lock(&self.fibers).len()
    }

    pub fn idle(&self) -> usize {
        lock(&self.idle).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fiber() -> Fiber {
        Fiber::new(16 * 1024, || {}).unwrap()
    }

    #[test]
    fn insert_hands_out_sequential_ids() {
        let arena = FiberArena::new();
        let a = arena.insert(fiber());
        let b = arena.insert(fiber());
        assert_ne!(a, b);
        assert_eq!(arena.created(), 2);
        assert_eq!(arena.idle(), 0);
        assert_ne!(arena.get(a).id(), arena.get(b).id());
    }

    #[test]
    fn released_fibers_are_reused() {
        let arena = FiberArena::new();
        let a = arena.insert(fiber());
        assert!(arena.pop_idle().is_none());
        arena.release(a);
        assert_eq!(arena.idle(), 1);
        assert_eq!(arena.pop_idle(), Some(a));
        assert_eq!(arena.created(), 1);
    }
}

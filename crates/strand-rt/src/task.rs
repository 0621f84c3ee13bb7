// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Task representation.
//!
//! A task is one boxed `FnOnce`: no result slot, no handle, no state.
//! Whoever pulls it from the pool runs it to completion on the fiber that
//! pulled it.

use std::fmt;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A deferred unit of work. Consumed exactly once by [`Task::run`].
pub struct Task {
    job: Job,
}

impl Task {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { job: Box::new(f) }
    }

    /// Capture `args` now, call `f(args)` when the task runs.
    ///
    /// Several arguments go in as a tuple: `Task::bind(|(a, b)| .., (a, b))`.
    pub fn bind<F, A>(f: F, args: A) -> Self
    where
        F: FnOnce(A) + Send + 'static,
        A: Send + 'static,
    {
        Self::new(move || f(args))
    }

    pub fn run(self) {
        (self.job)()
    }
}

impl<F> From<F> for Task
where
    F: FnOnce() + Send + 'static,
{
    fn from(f: F) -> Self {
        Self::new(f)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

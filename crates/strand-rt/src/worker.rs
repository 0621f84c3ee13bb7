// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Per-thread worker state.

use std::sync::Arc;

use strand_fiber::{switch_to, FiberError, ThreadFiber};

use crate::pool::FiberId;
use crate::scheduler::Shared;

/// One worker OS thread and its converted background fiber.
///
/// Lives on the background fiber's stack and never leaves its thread.
pub(crate) struct SlaveWorker {
    index: usize,
    shared: Arc<Shared>,
    thread: ThreadFiber,
}

impl SlaveWorker {
    /// Convert the calling thread into this worker's background fiber.
    pub fn initialize(shared: Arc<Shared>, index: usize) -> Result<Self, FiberError> {
        let thread = ThreadFiber::convert()?;
        tracing::debug!(worker = index, fiber = thread.id(), "worker initialized");
        Ok(Self {
            index,
            shared,
            thread,
        })
    }

    /// Drain passes until the scheduler stops with nothing pending.
    pub fn run(&mut self) {
        loop {
            self.run_pass();
            if !self.shared.wait_for_work() {
                break;
            }
        }
    }

    /// Hand the pool to an idle fiber until it is empty.
    pub fn run_pass(&mut self) {
        if !self.shared.has_tasks() {
            return;
        }
        match self.shared.acquire_idle_fiber() {
            Ok(id) => self.switch_to_fiber(id),
            Err(err) => {
                tracing::warn!(
                    worker = self.index,
                    error = %err,
                    "no pool fiber available; draining on the background fiber"
                );
                let ran = self.shared.drain();
                tracing::trace!(worker = self.index, ran, "drained on the background fiber");
            }
        }
    }

    /// The only place the scheduler switches fibers. The fiber goes back
    /// on the idle list once control has returned here, never before.
    pub fn switch_to_fiber(&mut self, id: FiberId) {
        let fiber = self.shared.fiber(id);
        tracing::trace!(worker = self.index, fiber = fiber.id(), "switching to pool fiber");
        switch_to(&fiber);
        self.shared.release_fiber(id);
    }
}

impl Drop for SlaveWorker {
    fn drop(&mut self) {
        tracing::debug!(
            worker = self.index,
            fiber = self.thread.id(),
            "worker released"
        );
    }
}

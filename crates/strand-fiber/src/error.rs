// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fiber errors.

use std::io;

use thiserror::Error;

use crate::fiber::FiberState;

/// Why a fiber could not be created, converted or re-primed.
#[derive(Debug, Error)]
pub enum FiberError {
    /// `Fiber::new` was asked for an empty stack.
    #[error("fiber stack size must be non-zero")]
    ZeroStackSize,

    /// The OS refused to map the stack.
    #[error("failed to allocate a {size}-byte fiber stack")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },

    /// The back-end could not prepare the context (native fiber creation).
    #[error("failed to prepare fiber context")]
    Context(#[source] io::Error),

    /// The calling thread already runs as a fiber.
    #[error("thread is already running as a fiber")]
    AlreadyConverted,

    /// The OS refused to convert the calling thread.
    #[error("failed to convert thread into a fiber")]
    ThreadConversion(#[source] io::Error),

    /// Reset/restart on a fiber that is started and not finished.
    #[error("fiber {id} cannot be re-primed while {state}")]
    Busy { id: u64, state: FiberState },
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Stackful fibers for the strand job scheduler.
//!
//! The only crate in the workspace with `unsafe` code. Everything above it
//! works with [`Fiber`] / [`ThreadFiber`] values and the two safe switch
//! functions.
//!
//! Components:
//! - `platform`: register save areas, `global_asm!` switch routines,
//!   guarded stacks, Windows native fibers
//! - `fiber`:    Fiber/ThreadFiber, lifecycle states, switch_to/yield_to_thread
//! - `current`:  per-thread running/thread fiber records
//! - `error`:    FiberError

mod current;
pub mod error;
mod fiber;
pub mod platform;

pub use error::FiberError;
pub use fiber::{
    current_fiber_id, is_thread_converted, switch_to, yield_to_thread, Fiber, FiberState,
    ThreadFiber,
};

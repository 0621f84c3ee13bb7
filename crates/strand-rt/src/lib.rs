// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! strand job scheduler.
//!
//! Runs many short closures across all cores on pooled, reusable fibers.
//! Collaborators only need [`Scheduler::enqueue`] (or
//! [`schedule_parallel`] with a bound scheduler) plus `begin`/`stop`.
//!
//! ```no_run
//! use strand_rt::{Scheduler, SchedulerConfig};
//!
//! let sched = Scheduler::new(SchedulerConfig::default());
//! sched.begin()?;
//! for tile in 0..64 {
//!     sched.enqueue(move || {
//!         let _ = tile;
//!     });
//! }
//! sched.stop();
//! # Ok::<(), strand_rt::SchedulerError>(())
//! ```
//!
//! Components:
//! - scheduler: Scheduler handle, shared state, drain loop
//! - worker:    SlaveWorker, the per-thread background fiber
//! - queue:     LIFO task pool
//! - pool:      fiber arena and idle list
//! - binding:   process-wide binding, schedule_parallel
//! - config:    SchedulerConfig, env overrides

#![forbid(unsafe_code)]

mod binding;
pub mod config;
pub mod error;
mod pool;
mod queue;
mod scheduler;
mod sync;
mod task;
mod worker;

pub use binding::{schedule_parallel, schedule_parallel_with};
pub use config::{SchedulerConfig, DEFAULT_FIBER_STACK_SIZE, MIN_FIBER_STACK_SIZE};
pub use error::{ConfigError, SchedulerError};
pub use scheduler::{Scheduler, SchedulerStats};
pub use task::Task;

/// Context-switch back-end compiled for this target.
pub use strand_fiber::platform::BACKEND as FIBER_BACKEND;

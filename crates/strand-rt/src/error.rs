// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler and configuration errors.

use std::io;

use strand_fiber::FiberError;
use thiserror::Error;

/// A configuration value that cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("worker thread count must be at least 1")]
    NoWorkers,

    #[error("fiber stack size {size} is below the minimum of {min} bytes")]
    StackTooSmall { size: usize, min: usize },

    /// An environment variable that does not parse.
    #[error("invalid value `{value}` for {var}")]
    InvalidValue { var: &'static str, value: String },
}

/// Why the scheduler could not start.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid scheduler configuration")]
    Config(#[from] ConfigError),

    /// Converting the calling thread or creating a pool fiber failed.
    #[error("fiber setup failed")]
    Fiber(#[from] FiberError),

    #[error("failed to spawn worker thread {index}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
}

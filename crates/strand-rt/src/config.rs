// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler configuration.
//!
//! Plain struct with defaults, validation and environment overrides
//! (`STRAND_WORKERS`, `STRAND_FIBER_STACK`).

use std::thread;

use crate::error::ConfigError;

/// Stack size for pool fibers when nothing else is configured.
pub const DEFAULT_FIBER_STACK_SIZE: usize = 256 * 1024;

/// Smallest fiber stack accepted by [`SchedulerConfig::validate`]. A task
/// that panics must still unwind back into the worker from a stack this
/// size, panic hook included.
pub const MIN_FIBER_STACK_SIZE: usize = 64 * 1024;

pub const WORKERS_ENV: &str = "STRAND_WORKERS";
pub const FIBER_STACK_ENV: &str = "STRAND_FIBER_STACK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// OS threads running tasks, including the thread that calls `begin`.
    pub worker_threads: usize,
    /// Bytes of stack per pool fiber.
    pub fiber_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            fiber_stack_size: DEFAULT_FIBER_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    pub fn with_workers(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_fiber_stack_size(mut self, bytes: usize) -> Self {
        self.fiber_stack_size = bytes;
        self
    }

    /// Defaults, overridden by `STRAND_WORKERS` / `STRAND_FIBER_STACK`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through
    /// `lookup`. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(WORKERS_ENV) {
            config.worker_threads = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: WORKERS_ENV,
                value: raw,
            })?;
        }
        if let Some(raw) = lookup(FIBER_STACK_ENV) {
            config.fiber_stack_size = parse_size(&raw).ok_or_else(|| ConfigError::InvalidValue {
                var: FIBER_STACK_ENV,
                value: raw,
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.fiber_stack_size < MIN_FIBER_STACK_SIZE {
            return Err(ConfigError::StackTooSmall {
                size: self.fiber_stack_size,
                min: MIN_FIBER_STACK_SIZE,
            });
        }
        Ok(())
    }
}

/// Available cores, or 4 if that cannot be determined.
pub fn default_worker_threads() -> usize {
    thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Byte count with an optional `k`/`m` suffix (binary units).
///
/// `"65536"`, `"64k"`, `"1M"`. Returns `None` on garbage or overflow.
pub fn parse_size(raw: &str) -> Option<usize> {
    let s = raw.trim().to_ascii_lowercase();
    let (digits, scale) = match s.as_bytes().last()? {
        b'k' => (&s[..s.len() - 1], 1024),
        b'm' => (&s[..s.len() - 1], 1024 * 1024),
        _ => (&s[..], 1),
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SchedulerConfig::default();
        assert!(config.worker_threads >= 1);
        assert_eq!(config.fiber_stack_size, DEFAULT_FIBER_STACK_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("65536"), Some(65536));
        assert_eq!(parse_size("64k"), Some(64 * 1024));
        assert_eq!(parse_size(" 2M "), Some(2 * 1024 * 1024));
        assert_eq!(parse_size("k"), None);
        assert_eq!(parse_size(""), None);
        assert_eq!(parse_size("12x"), None);
        assert_eq!(parse_size("-4k"), None);
        assert_eq!(parse_size(&format!("{}m", usize::MAX)), None);
    }

    #[test]
    fn env_overrides_defaults() {
        let config =
            SchedulerConfig::from_lookup(lookup(&[(WORKERS_ENV, "3"), (FIBER_STACK_ENV, "128k")]))
                .unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.fiber_stack_size, 128 * 1024);
    }

    #[test]
    fn missing_env_keeps_defaults() {
        let config = SchedulerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn bad_worker_count_is_reported() {
        let err = SchedulerConfig::from_lookup(lookup(&[(WORKERS_ENV, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var: WORKERS_ENV, .. }));
        assert!(err.to_string().contains("many"));
    }

    #[test]
    fn zero_workers_rejected() {
        let err = SchedulerConfig::from_lookup(lookup(&[(WORKERS_ENV, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::NoWorkers));
    }

    #[test]
    fn minimum_stack_accepted() {
        let config = SchedulerConfig::default().with_fiber_stack_size(MIN_FIBER_STACK_SIZE);
        assert!(config.validate().is_ok());
        let below = config.with_fiber_stack_size(MIN_FIBER_STACK_SIZE - 1);
        assert!(matches!(below.validate(), Err(ConfigError::StackTooSmall { .. })));
    }

    #[test]
    fn tiny_stack_rejected() {
        let err = SchedulerConfig::default()
            .with_fiber_stack_size(1024)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::StackTooSmall {
                size: 1024,
                min: MIN_FIBER_STACK_SIZE
            }
        ));
    }
}

// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! CLI output formatting with colors and styling.
//!
//! Respects NO_COLOR and FORCE_COLOR environment variables.
//! Colors are automatically disabled when output is piped.

use std::time::Duration;

use colored::{ColoredString, Colorize};

/// Initialize color support based on environment.
/// Call once at startup.
pub fn init() {
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    } else if std::env::var("FORCE_COLOR").is_ok() {
        colored::control::set_override(true);
    }
}

pub fn error_label() -> ColoredString {
    "error".red().bold()
}

pub fn banner_ok(phase: &str) -> String {
    format!(
        "{} {} {}",
        "===".dimmed(),
        format!("{} OK", phase).green().bold(),
        "===".dimmed()
    )
}

pub fn section_header(header: &str) -> ColoredString {
    header.yellow().bold()
}

/// `  key    value`, key padded to a fixed column.
pub fn field(key: &str, value: impl std::fmt::Display) -> String {
    format!("  {:<16} {}", key.cyan(), value)
}

pub fn duration(d: Duration) -> ColoredString {
    format!("{:.2} ms", d.as_secs_f64() * 1000.0).bold()
}

pub fn checksum(sum: u64) -> ColoredString {
    format!("{:016x}", sum).green()
}

/// Byte count in the largest binary unit that divides it.
pub fn bytes(n: usize) -> String {
    if n >= 1024 * 1024 && n % (1024 * 1024) == 0 {
        format!("{} MiB", n / (1024 * 1024))
    } else if n >= 1024 && n % 1024 == 0 {
        format!("{} KiB", n / 1024)
    } else {
        format!("{} B", n)
    }
}

#![deny(missing_docs)]
//! Shared logging utilities for the trustee workspace.
//!
//! This crate provides the `trustee_*` logging macros used across the codebase,
//! a per-thread lane label that prefixes every line, and a minimal test
//! initializer for the global logger.

use std::cell::Cell;

thread_local! {
    /// Thread-local label of the lane (dispatcher or pool worker) running on this thread.
    static LANE_LABEL: Cell<&'static str> = const { Cell::new("main") };
}

/// Sets the lane label for the current thread.
/// Worker and dispatcher threads call this once when they start.
pub fn set_lane_label(label: &'static str) {
    LANE_LABEL.with(|v| v.set(label));
}

/// Retrieves the lane label for the current thread.
/// Returns `"main"` if the label has not been set.
pub fn lane_label() -> &'static str {
    LANE_LABEL.with(|v| v.get())
}

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! trustee_trace {
    ($($arg:tt)*) => {{
        log::trace!("[{}] {}", $crate::lane_label(), format_args!($($arg)*));
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! trustee_info {
    ($($arg:tt)*) => {{
        log::info!("[{}] {}", $crate::lane_label(), format_args!($($arg)*));
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! trustee_debug {
    ($($arg:tt)*) => {{
        log::debug!("[{}] {}", $crate::lane_label(), format_args!($($arg)*));
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! trustee_warn {
    ($($arg:tt)*) => {{
        log::warn!("[{}] {}", $crate::lane_label(), format_args!($($arg)*));
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! trustee_error {
    ($($arg:tt)*) => {{
        log::error!("[{}] {}", $crate::lane_label(), format_args!($($arg)*));
    }};
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

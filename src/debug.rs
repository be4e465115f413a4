//! Trace logging gated by the `DEBUG` environment variable.
//!
//! The source stub reads a process-wide `_debug_enabled` global at
//! startup; here that's a single atomic bool set once in `main` and
//! snapshotted by every caller of [`trace!`] (spec §9 Design Notes).

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Initialize the debug flag from the `DEBUG` environment variable.
/// Call once, early in `main`.
pub fn init() {
    let enabled = std::env::var("DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    DEBUG_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Snapshot of whether trace logging is currently enabled.
pub fn enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Relaxed)
}

/// Print a trace line to stderr iff `DEBUG=1`/`true`. No-op otherwise.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        if $crate::debug::enabled() {
            eprintln!("[stub] {}", format!($($arg)*));
        }
    };
}

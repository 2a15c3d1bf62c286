//! Tracing and logging (shared setup).

pub use self::tracing::{LogFormat, LogSettings};

/// Initialize process-wide observability (tracing/logging).
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init(settings: &LogSettings<'_>) {
    tracing::init(settings);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

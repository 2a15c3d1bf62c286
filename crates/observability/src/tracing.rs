//! Tracing/logging initialization.
//!
//! The worker is headless: structured logs are its only observable surface,
//! so every outcome is emitted as fields rather than prose. Deployed workers
//! log flat JSON for the log pipeline; local runs get compact text.

use tracing_subscriber::EnvFilter;

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One flat JSON object per event.
    Json,
    /// Single-line human readable output.
    Compact,
}

/// Process-wide logging settings.
#[derive(Debug, Clone, Copy)]
pub struct LogSettings<'a> {
    /// Reported once at startup so log streams can be told apart.
    pub service: &'a str,
    pub version: &'a str,
    /// Filter used when `RUST_LOG` is unset.
    pub default_directive: &'a str,
    pub format: LogFormat,
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(settings: &LogSettings<'_>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.default_directive));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match settings.format {
        LogFormat::Json => builder
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    if installed.is_ok() {
        ::tracing::info!(
            service = settings.service,
            version = settings.version,
            format = ?settings.format,
            "logging initialized"
        );
    }
}

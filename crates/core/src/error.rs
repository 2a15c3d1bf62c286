//! Sync error taxonomy.

use thiserror::Error;

/// Result type used across the sync pipeline.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure of a single pipeline stage.
///
/// Every per-message failure is one of the first four variants and is
/// converted into a log line plus a dropped message at the dispatch boundary.
/// `Fatal` is reserved for consumer-level faults that stop the worker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Inbound event was malformed or out of range.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced product does not exist in the catalog.
    #[error("not found: {0}")]
    NotFound(String),

    /// A dependency could not be reached (timeout, connection, 5xx).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The catalog service refused the payload under its own rules.
    #[error("rejected by catalog: {0}")]
    RejectedInput(String),

    /// Consumer-level fault; the worker cannot continue.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl SyncError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::RejectedInput(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Only transient dependency faults are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Stable, lowercase name of the variant (used as a log field).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Unavailable(_) => "unavailable",
            Self::RejectedInput(_) => "rejected_input",
            Self::Fatal(_) => "fatal",
        }
    }
}

//! Message source abstraction (mechanics only).
//!
//! A `MessageSource` is the consuming side of a topic-based message bus. The
//! sync worker drives it through its lifecycle:
//!
//! ```text
//! connect() → subscribe(topics) → next_message() … → close()
//! ```
//!
//! ## Delivery semantics
//!
//! - **Start from latest**: a subscription only observes messages published
//!   after it was established. Historical events are never replayed.
//! - **Per-partition order**: messages of one `(topic, partition)` arrive in
//!   offset order. Nothing is promised across partitions.
//! - **No redelivery on failure**: the worker drops messages it cannot apply;
//!   the source is never asked to retry them.
//! - **Commit after outcome**: the worker acknowledges a message once it has
//!   been applied or dropped. Only acknowledged positions may be committed, so
//!   messages read but never finished come back after a restart.
//!
//! ## Cancellation
//!
//! `next_message()` is awaited inside a `tokio::select!` next to the shutdown
//! signal, so implementations must be cancel-safe: dropping the future before
//! it completes must not lose a message.

use async_trait::async_trait;

use crate::topic::Topic;

/// A message exactly as the bus delivered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Transport failure reported by a message source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("bus connection error: {0}")]
    Connection(String),

    #[error("bus subscription error: {0}")]
    Subscription(String),

    /// A single fetch failed; the client keeps its session and recovers.
    #[error("bus consumption error: {0}")]
    Consumption(String),

    /// The client itself is broken (lost group membership, poisoned state, ...).
    #[error("bus client fault: {0}")]
    Client(String),
}

impl BusError {
    /// Whether the consume loop may keep going after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BusError::Consumption(_))
    }
}

/// Consuming side of the message bus.
#[async_trait]
pub trait MessageSource: Send {
    /// Open the connection to the bus.
    async fn connect(&mut self) -> Result<(), BusError>;

    /// Join the consumer group for `topics`, starting at the current offset.
    async fn subscribe(&mut self, topics: &[Topic]) -> Result<(), BusError>;

    /// Wait for the next message. `Ok(None)` means the source has been closed.
    async fn next_message(&mut self) -> Result<Option<RawMessage>, BusError>;

    /// Mark `offset` of `(topic, partition)` as finished.
    async fn acknowledge(&mut self, topic: &str, partition: i32, offset: i64)
    -> Result<(), BusError>;

    /// Leave the group and release the connection.
    async fn close(&mut self) -> Result<(), BusError>;
}

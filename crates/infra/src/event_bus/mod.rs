//! Message bus adapters.
//!
//! The `MessageSource` abstraction and the in-memory bus live in
//! `larder-events`. This module provides broker-backed sources.

#[cfg(feature = "kafka")]
pub mod kafka;

#[cfg(feature = "kafka")]
pub use kafka::KafkaMessageSource;

//! `larder-core`: shared building blocks for the ERP sync worker.
//!
//! This crate contains **pure** primitives (no IO): the error taxonomy every
//! pipeline stage reports through, and the identifiers those stages pass around.

pub mod error;
pub mod id;

pub use error::{SyncError, SyncResult};
pub use id::{ProductId, Sku};

//! Long-running background workers.

pub mod sync_worker;

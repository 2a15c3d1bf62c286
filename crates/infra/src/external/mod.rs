//! External service clients/adapters.

pub mod catalog;

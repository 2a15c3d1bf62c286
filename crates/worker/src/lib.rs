//! ERP → catalog sync worker process.

pub mod app;

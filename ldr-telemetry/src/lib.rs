//! Tracing initialization for logical replication ingestion jobs.

mod logging;

pub use logging::*;

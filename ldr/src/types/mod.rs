//! Core data types flowing through the ingestion pipeline.

mod event;
mod row;
mod stats;
mod timestamp;

pub use event::*;
pub use row::*;
pub use stats::*;
pub use timestamp::*;

/// Unique identifier of an ingestion job.
pub type JobId = u64;

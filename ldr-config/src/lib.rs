//! Configuration for logical replication ingestion jobs.
//!
//! Provides environment detection, hierarchical configuration loading from YAML files and
//! environment variables, and the shared configuration types consumed by the `ldr` crate.

mod environment;
mod load;
pub mod shared;

pub use environment::*;
pub use load::*;

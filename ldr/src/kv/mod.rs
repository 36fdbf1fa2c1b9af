//! Interface to the transactional key-value layer the ingestion core writes into.

mod base;
pub mod memory;
mod write_log;

pub use base::*;
pub use write_log::*;

//! Application of batches of change events in a single transaction.

mod base;
mod kv;

pub use base::*;
pub use kv::*;

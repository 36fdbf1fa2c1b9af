//! Interfaces to the producer side of a replication stream.

mod base;
mod plan;

pub use base::*;
pub use plan::*;

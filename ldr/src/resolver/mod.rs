//! Conflict resolution between a replicated change and the local version of its row.

mod base;
mod lww;
mod udf;

pub use base::*;
pub use lww::*;
pub use udf::*;

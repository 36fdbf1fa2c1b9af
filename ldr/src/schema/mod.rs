//! Table descriptors of replicated tables and the row codec used to interpret change events.

mod codec;
mod descriptor;

pub use codec::*;
pub use descriptor::*;

mod base;
mod batch;
mod ingestion;
mod retry;

pub use base::*;
pub use batch::*;
pub use ingestion::*;
pub use retry::*;

//! Replicated time tracking and persistence of job progress.

mod frontier;
mod progress;
mod tracker;

pub use frontier::*;
pub use progress::*;
pub use tracker::*;

//! Worker implementations for the concurrent tasks of a replication flow.
//!
//! Writer workers apply the change stream of one partition each and are coordinated by a pool,
//! while the heartbeat and replanner workers watch the producer and the local topology and end
//! with an error when the flow must be rebuilt.

pub mod base;
pub mod heartbeat;
pub mod pool;
pub mod replanner;
pub mod writer;

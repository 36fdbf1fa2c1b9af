//! Ingestion core of cross-cluster logical data replication.
//!
//! Change events streamed from a producer cluster are applied to a transactional key-value store,
//! with conflicts resolved by last-writer-wins or a user supplied function. Events that cannot be
//! applied yet wait in a bounded purgatory, events that can never be applied go to a dead letter
//! queue. The replicated time of a job only advances once every event up to it is durably applied.

pub mod applier;
pub mod checkpoint;
pub mod concurrency;
pub mod dlq;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod handler;
pub mod kv;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod purgatory;
pub mod resolver;
pub mod schema;
pub mod settings;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;

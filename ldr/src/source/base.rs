use std::fmt;
use std::future::Future;

use futures::Stream;

use crate::error::LdrResult;
use crate::source::{FlowPartition, FlowPlan, NodeTopology};
use crate::types::{ChangeEvent, Timestamp};

/// A message received on the change stream of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Changes in source commit order for each key.
    Events(Vec<ChangeEvent>),
    /// Every change of the partition at or before this time has been sent.
    Checkpoint(Timestamp),
}

impl StreamMessage {
    /// Number of events carried, used to size batches.
    pub fn event_count(&self) -> usize {
        match self {
            StreamMessage::Events(events) => events.len(),
            StreamMessage::Checkpoint(_) => 0,
        }
    }
}

/// Producer of change events.
pub trait ChangeSource {
    type Stream: Stream<Item = LdrResult<StreamMessage>> + Send + Unpin + 'static;

    /// Splits the replicated keyspace into partitions, starting at `resume_from`.
    fn plan(&self, resume_from: Timestamp) -> impl Future<Output = LdrResult<FlowPlan>> + Send;

    /// Opens the change stream of `partition`, with changes strictly after `resume_from`.
    fn subscribe(
        &self,
        partition: &FlowPartition,
        resume_from: Timestamp,
    ) -> impl Future<Output = LdrResult<Self::Stream>> + Send;
}

/// Status of the producer side of a replication stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    Active,
    Inactive,
    Paused,
    UnknownRetry,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamStatus::Active => "STREAM_ACTIVE",
            StreamStatus::Inactive => "STREAM_INACTIVE",
            StreamStatus::Paused => "STREAM_PAUSED",
            StreamStatus::UnknownRetry => "UNKNOWN_STREAM_STATUS_RETRY",
        };

        f.write_str(name)
    }
}

/// Control channel to the producer.
pub trait ProducerClient {
    /// Reports `frontier` as the consumer's replicated time and returns the stream status.
    fn heartbeat(
        &self,
        stream_id: &str,
        frontier: Option<Timestamp>,
    ) -> impl Future<Output = LdrResult<StreamStatus>> + Send;
}

/// Source of the local cluster's node topology.
pub trait TopologyProvider {
    fn topology(&self) -> impl Future<Output = LdrResult<NodeTopology>> + Send;
}

use std::collections::HashMap;

use crate::source::PartitionId;
use crate::types::Timestamp;

/// Released checkpoints of every partition of a flow.
///
/// The flow as a whole has only replicated up to the slowest partition.
#[derive(Debug, Clone)]
pub struct FlowFrontier {
    partitions: HashMap<PartitionId, Timestamp>,
}

impl FlowFrontier {
    pub fn new(partitions: impl IntoIterator<Item = PartitionId>, resume_from: Timestamp) -> Self {
        Self {
            partitions: partitions
                .into_iter()
                .map(|partition| (partition, resume_from))
                .collect(),
        }
    }

    /// Records a released checkpoint, ignoring unknown partitions and regressions.
    pub fn update(&mut self, partition: PartitionId, ts: Timestamp) -> bool {
        match self.partitions.get_mut(&partition) {
            Some(current) if ts > *current => {
                *current = ts;
                true
            }
            _ => false,
        }
    }

    /// The minimum released checkpoint, `None` for a flow without partitions.
    pub fn min(&self) -> Option<Timestamp> {
        self.partitions.values().min().copied()
    }
}

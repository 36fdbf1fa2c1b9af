use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Identifier of a partition of the source keyspace, consumed by one writer.
pub type PartitionId = u32;

/// Identifier of a node of the local cluster.
pub type NodeId = u32;

/// A partition of the flow and the node it was assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPartition {
    pub id: PartitionId,
    pub node_id: NodeId,
    /// Address of the producer endpoint serving the partition.
    pub address: String,
}

/// The partitions of a replication flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPlan {
    pub partitions: Vec<FlowPartition>,
}

impl FlowPlan {
    pub fn new(partitions: Vec<FlowPartition>) -> Self {
        Self { partitions }
    }

    /// Nodes the plan assigned at least one partition to.
    pub fn node_ids(&self) -> BTreeSet<NodeId> {
        self.partitions
            .iter()
            .map(|partition| partition.node_id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub address: String,
    /// Number of ranges of the replicated tables the node holds the lease for.
    pub leaseholders: u32,
}

/// Snapshot of the local cluster's nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTopology {
    pub nodes: BTreeMap<NodeId, NodeInfo>,
}

impl NodeTopology {
    pub fn with_node(mut self, node_id: NodeId, address: impl Into<String>, leaseholders: u32) -> Self {
        self.nodes.insert(
            node_id,
            NodeInfo {
                address: address.into(),
                leaseholders,
            },
        );
        self
    }

    /// Nodes a freshly computed plan would use: those holding leases.
    pub fn ideal_nodes(&self) -> BTreeSet<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, info)| info.leaseholders > 0)
            .map(|(node_id, _)| *node_id)
            .collect()
    }
}

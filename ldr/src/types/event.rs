use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// The version of a row that preceded a change on the source cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrevImage {
    /// Encoded previous row, `None` if the previous version was a deletion.
    pub value: Option<Bytes>,
    /// Commit timestamp of the previous version on the source.
    pub mvcc_timestamp: Timestamp,
}

/// A single row-level change read from the source cluster.
///
/// A change event is immutable once received. It is applied, parked in purgatory, or recorded in
/// the dead letter queue, never modified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Encoded primary key, including the table and column family prefix.
    pub key: Bytes,
    /// Encoded row, `None` for a deletion.
    pub value: Option<Bytes>,
    /// Set when the source row was itself written by replication from a third cluster.
    pub origin_timestamp: Option<Timestamp>,
    /// Commit timestamp of the change on the source.
    pub mvcc_timestamp: Timestamp,
    /// Previous version of the row, when the source supplied one.
    pub prev_value: Option<PrevImage>,
}

impl ChangeEvent {
    pub fn is_delete(&self) -> bool {
        self.value.is_none()
    }

    /// Timestamp the change competes with during conflict resolution.
    ///
    /// Uses the origin timestamp when the source row was replicated, otherwise the source commit
    /// timestamp.
    pub fn proposed_timestamp(&self) -> Timestamp {
        self.origin_timestamp.unwrap_or(self.mvcc_timestamp)
    }

    /// Number of bytes accounted for this event in purgatory.
    pub fn byte_size(&self) -> u64 {
        let value = self.value.as_ref().map_or(0, Bytes::len);
        let prev = self
            .prev_value
            .as_ref()
            .and_then(|prev| prev.value.as_ref())
            .map_or(0, Bytes::len);

        (self.key.len() + value + prev) as u64
    }
}

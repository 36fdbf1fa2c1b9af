use std::fmt;
use std::future::Future;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LdrResult;
use crate::types::Timestamp;

/// Identifier of a logical transaction, stable across its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The kind of write request sent to the key-value layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WriteKind {
    Put,
    CPut,
}

/// A value stored under a row key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvValue {
    /// Encoded row, `None` for a tombstone.
    pub row: Option<Bytes>,
    /// Value of the hidden origin timestamp column, set only on replicated writes.
    pub origin_timestamp: Option<Timestamp>,
}

/// The latest committed version of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValue {
    pub value: KvValue,
    /// Local commit timestamp of this version.
    pub mvcc_timestamp: Timestamp,
}

impl VersionedValue {
    /// Timestamp this version competes with during conflict resolution.
    pub fn replication_timestamp(&self) -> Timestamp {
        self.value.origin_timestamp.unwrap_or(self.mvcc_timestamp)
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.row.is_none()
    }
}

/// A transactional key-value store.
pub trait KvStore {
    type Txn: KvTxn + Send;

    /// Starts a transaction attempt for the logical transaction `txn_id`.
    fn begin(&self, txn_id: TxnId) -> impl Future<Output = LdrResult<Self::Txn>> + Send;
}

/// A single transaction attempt.
///
/// Writes become visible to other transactions only on [`KvTxn::commit`]. A commit may fail with
/// [`crate::error::ErrorKind::TransactionRetry`], in which case the caller starts a new attempt
/// with the same [`TxnId`].
pub trait KvTxn {
    fn id(&self) -> TxnId;

    /// Reads the latest version of `key`, including this transaction's own writes.
    fn get(&mut self, key: &[u8]) -> impl Future<Output = LdrResult<Option<VersionedValue>>> + Send;

    /// Writes `value` regardless of the current version.
    fn put(&mut self, key: Bytes, value: KvValue) -> impl Future<Output = LdrResult<()>> + Send;

    /// Writes `value` only if the current version equals `expected`, `None` meaning that no
    /// version exists.
    ///
    /// Fails with [`crate::error::ErrorKind::ConditionFailed`] otherwise.
    fn cput(
        &mut self,
        key: Bytes,
        value: KvValue,
        expected: Option<KvValue>,
    ) -> impl Future<Output = LdrResult<()>> + Send;

    /// Commits the transaction, returning its commit timestamp.
    fn commit(self) -> impl Future<Output = LdrResult<Timestamp>> + Send;
}

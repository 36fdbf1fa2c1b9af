use std::collections::BTreeSet;

use bytes::Bytes;

use crate::kv::{TxnId, WriteKind};

/// Bookkeeping of the write requests issued by one logical transaction.
///
/// Each `(kind, key)` pair is recorded once, so the requests re-issued by a retried attempt of the
/// same transaction are not counted twice.
#[derive(Debug)]
pub struct TxnWriteLog {
    txn_id: TxnId,
    writes: BTreeSet<(WriteKind, Bytes)>,
}

impl TxnWriteLog {
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            writes: BTreeSet::new(),
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    /// Records a write, returning `true` if it was not recorded before.
    pub fn record(&mut self, kind: WriteKind, key: &Bytes) -> bool {
        self.writes.insert((kind, key.clone()))
    }

    pub fn count(&self, kind: WriteKind) -> u64 {
        self.writes.iter().filter(|(k, _)| *k == kind).count() as u64
    }

    pub fn puts(&self) -> u64 {
        self.count(WriteKind::Put)
    }

    pub fn cputs(&self) -> u64 {
        self.count(WriteKind::CPut)
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ErrorKind, LdrResult};
use crate::kv::{KvStore, KvTxn, KvValue, TxnId, VersionedValue};
use crate::types::{ChangeEvent, PrevImage, Timestamp};
use crate::{bail, ldr_error};

/// Monotonic clock handing out commit timestamps.
///
/// Sharing one clock between several stores gives their commits a single total order, which is
/// what two clusters replicating into each other observe in practice.
#[derive(Debug, Clone, Default)]
pub struct HybridClock {
    wall_time: Arc<AtomicI64>,
}

impl HybridClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::new(self.wall_time.fetch_add(1, Ordering::SeqCst) + 1, 0)
    }
}

/// Number of requests received by a [`MemoryKvStore`], retried attempts included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub gets: u64,
    pub puts: u64,
    pub cputs: u64,
    pub commits: u64,
    pub retried_commits: u64,
}

/// A committed write, kept to serve as a change feed.
#[derive(Debug, Clone)]
struct CommittedWrite {
    key: Bytes,
    version: VersionedValue,
    prev: Option<VersionedValue>,
}

#[derive(Debug, Default)]
struct Inner {
    data: BTreeMap<Bytes, VersionedValue>,
    changes: Vec<CommittedWrite>,
    pending_txn_retries: u32,
    requests: RequestCounts,
}

/// In-memory [`KvStore`].
#[derive(Debug, Clone)]
pub struct MemoryKvStore {
    clock: HybridClock,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::with_clock(HybridClock::new())
    }

    pub fn with_clock(clock: HybridClock) -> Self {
        Self {
            clock,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    pub fn clock(&self) -> &HybridClock {
        &self.clock
    }

    /// Makes the next `count` commits fail with [`ErrorKind::TransactionRetry`].
    pub async fn inject_txn_retries(&self, count: u32) {
        self.inner.lock().await.pending_txn_retries += count;
    }

    pub async fn request_counts(&self) -> RequestCounts {
        self.inner.lock().await.requests
    }

    /// Commits a write issued by a local client, without an origin timestamp.
    pub async fn write_local(&self, key: Bytes, row: Option<Bytes>) -> Timestamp {
        let mut inner = self.inner.lock().await;
        let mvcc_timestamp = self.clock.now();
        let value = KvValue {
            row,
            origin_timestamp: None,
        };
        inner.commit_write(key, value, mvcc_timestamp);

        mvcc_timestamp
    }

    pub async fn get_committed(&self, key: &[u8]) -> Option<VersionedValue> {
        self.inner.lock().await.data.get(key).cloned()
    }

    /// Returns every key with its latest version, tombstones included.
    pub async fn scan(&self) -> Vec<(Bytes, VersionedValue)> {
        let inner = self.inner.lock().await;
        inner
            .data
            .iter()
            .map(|(key, version)| (key.clone(), version.clone()))
            .collect()
    }

    /// Returns the changes committed after `after`, in commit order.
    ///
    /// Writes applied by replication are skipped unless `include_replicated` is set, the same
    /// filtering a producer applies so that replicated rows are not sent back to their origin.
    pub async fn changes_since(&self, after: Timestamp, include_replicated: bool) -> Vec<ChangeEvent> {
        let inner = self.inner.lock().await;
        inner
            .changes
            .iter()
            .filter(|change| change.version.mvcc_timestamp > after)
            .filter(|change| include_replicated || change.version.value.origin_timestamp.is_none())
            .map(|change| ChangeEvent {
                key: change.key.clone(),
                value: change.version.value.row.clone(),
                origin_timestamp: change.version.value.origin_timestamp,
                mvcc_timestamp: change.version.mvcc_timestamp,
                prev_value: change.prev.as_ref().map(|prev| PrevImage {
                    value: prev.value.row.clone(),
                    mvcc_timestamp: prev.mvcc_timestamp,
                }),
            })
            .collect()
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn commit_write(&mut self, key: Bytes, value: KvValue, mvcc_timestamp: Timestamp) {
        let version = VersionedValue {
            value,
            mvcc_timestamp,
        };
        let prev = self.data.insert(key.clone(), version.clone());
        self.changes.push(CommittedWrite { key, version, prev });
    }
}

impl KvStore for MemoryKvStore {
    type Txn = MemoryKvTxn;

    async fn begin(&self, txn_id: TxnId) -> LdrResult<Self::Txn> {
        Ok(MemoryKvTxn {
            txn_id,
            store: self.clone(),
            provisional_timestamp: self.clock.now(),
            writes: BTreeMap::new(),
        })
    }
}

/// Transaction attempt against a [`MemoryKvStore`], buffering its writes until commit.
#[derive(Debug)]
pub struct MemoryKvTxn {
    txn_id: TxnId,
    store: MemoryKvStore,
    provisional_timestamp: Timestamp,
    writes: BTreeMap<Bytes, KvValue>,
}

impl MemoryKvTxn {
    async fn current(&self, key: &[u8]) -> Option<VersionedValue> {
        if let Some(value) = self.writes.get(key) {
            return Some(VersionedValue {
                value: value.clone(),
                mvcc_timestamp: self.provisional_timestamp,
            });
        }

        self.store.inner.lock().await.data.get(key).cloned()
    }
}

impl KvTxn for MemoryKvTxn {
    fn id(&self) -> TxnId {
        self.txn_id
    }

    async fn get(&mut self, key: &[u8]) -> LdrResult<Option<VersionedValue>> {
        self.store.inner.lock().await.requests.gets += 1;

        Ok(self.current(key).await)
    }

    async fn put(&mut self, key: Bytes, value: KvValue) -> LdrResult<()> {
        self.store.inner.lock().await.requests.puts += 1;
        self.writes.insert(key, value);

        Ok(())
    }

    async fn cput(&mut self, key: Bytes, value: KvValue, expected: Option<KvValue>) -> LdrResult<()> {
        self.store.inner.lock().await.requests.cputs += 1;

        let actual = self.current(&key).await.map(|version| version.value);
        if actual != expected {
            bail!(
                ErrorKind::ConditionFailed,
                "Unexpected value for conditional put",
                format!(
                    "expected {}, found {}",
                    describe(expected.as_ref()),
                    describe(actual.as_ref())
                )
            );
        }

        self.writes.insert(key, value);

        Ok(())
    }

    async fn commit(self) -> LdrResult<Timestamp> {
        let mut inner = self.store.inner.lock().await;

        if inner.pending_txn_retries > 0 {
            inner.pending_txn_retries -= 1;
            inner.requests.retried_commits += 1;
            debug!(txn_id = %self.txn_id, "forcing a transaction retry");

            return Err(ldr_error!(
                ErrorKind::TransactionRetry,
                "Transaction must be retried",
                format!("transaction {} hit a retryable conflict", self.txn_id)
            ));
        }

        let commit_timestamp = self.store.clock.now();
        for (key, value) in self.writes {
            inner.commit_write(key, value, commit_timestamp);
        }
        inner.requests.commits += 1;

        Ok(commit_timestamp)
    }
}

fn describe(value: Option<&KvValue>) -> &'static str {
    match value {
        None => "no value",
        Some(KvValue { row: None, .. }) => "a tombstone",
        Some(_) => "a different row",
    }
}

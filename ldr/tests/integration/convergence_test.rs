use ldr::handler::{BatchHandler, KvBatchHandler};
use ldr::kv::memory::{HybridClock, MemoryKvStore};
use ldr::resolver::LwwResolver;
use ldr::test_utils::pipeline::{fingerprint, lww_handler, test_config};
use ldr::test_utils::table::{user_key, user_row};
use ldr::types::Timestamp;
use ldr_telemetry::init_test_tracing;

/// One side of a bidirectional replication setup.
struct Cluster {
    store: MemoryKvStore,
    /// Applies the changes of the other cluster into `store`.
    handler: KvBatchHandler<MemoryKvStore, LwwResolver>,
    /// Commit time of the last local change shipped to the other cluster.
    shipped: Timestamp,
}

impl Cluster {
    fn new(clock: &HybridClock) -> Self {
        let store = MemoryKvStore::with_clock(clock.clone());
        Self {
            handler: lww_handler(store.clone(), &test_config(1)),
            store,
            shipped: Timestamp::MIN,
        }
    }

    async fn write(&self, id: i64, row: Option<(&str, i64)>) {
        self.store
            .write_local(user_key(id), row.map(|(name, balance)| user_row(name, balance)))
            .await;
    }

    /// Ships the local changes committed since the last call into `other`, one event at a time.
    async fn ship_to(&mut self, other: &Cluster) {
        let changes = self.store.changes_since(self.shipped, false).await;
        for event in changes {
            self.shipped = event.mvcc_timestamp;
            other.handler.handle_batch(&[event]).await.unwrap();
        }
    }
}

async fn exchange(a: &mut Cluster, b: &mut Cluster) {
    a.ship_to(b).await;
    b.ship_to(a).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bidirectional_replication_converges() {
    init_test_tracing();
    let clock = HybridClock::new();
    let mut a = Cluster::new(&clock);
    let mut b = Cluster::new(&clock);

    // Disjoint inserts, then conflicting inserts of the same key.
    a.write(1, Some(("alice", 10))).await;
    b.write(2, Some(("bob", 20))).await;
    a.write(3, Some(("carol-a", 30))).await;
    b.write(3, Some(("carol-b", 31))).await;
    exchange(&mut a, &mut b).await;

    assert_eq!(fingerprint(&a.store).await, fingerprint(&b.store).await);
    assert_eq!(
        b.store.get_committed(&user_key(3)).await.unwrap().value.row,
        Some(user_row("carol-b", 31))
    );

    // Concurrent updates of the same row, and a delete racing a newer update.
    b.write(1, Some(("alice-b", 11))).await;
    a.write(1, Some(("alice-a", 12))).await;
    a.write(2, None).await;
    b.write(2, Some(("bob-b", 21))).await;
    exchange(&mut a, &mut b).await;

    assert_eq!(fingerprint(&a.store).await, fingerprint(&b.store).await);
    assert_eq!(
        a.store.get_committed(&user_key(1)).await.unwrap().value.row,
        Some(user_row("alice-a", 12))
    );
    assert_eq!(
        a.store.get_committed(&user_key(2)).await.unwrap().value.row,
        Some(user_row("bob-b", 21))
    );

    // Replicated writes are not sent back to their origin.
    assert!(a.store.changes_since(a.shipped, false).await.is_empty());
    assert!(b.store.changes_since(b.shipped, false).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn replaying_changes_is_idempotent() {
    init_test_tracing();
    let clock = HybridClock::new();
    let mut a = Cluster::new(&clock);
    let b = Cluster::new(&clock);

    a.write(1, Some(("alice", 10))).await;
    a.write(1, Some(("alice", 11))).await;
    a.write(2, Some(("bob", 20))).await;
    a.ship_to(&b).await;
    let before = fingerprint(&b.store).await;

    // A flow restart resends everything after the last persisted replicated time.
    for event in a.store.changes_since(Timestamp::MIN, false).await {
        let stats = b.handler.handle_batch(&[event]).await.unwrap();
        assert_eq!(stats.rows_applied, 0);
    }

    assert_eq!(fingerprint(&b.store).await, before);
    assert_eq!(fingerprint(&a.store).await, before);
}

use ldr::error::ErrorKind;
use ldr::handler::BatchHandler;
use ldr::kv::memory::MemoryKvStore;
use ldr::test_utils::pipeline::{lww_handler, test_config};
use ldr::test_utils::table::{ChangeEventExt, delete, undecodable, upsert, user_key, user_row};
use ldr::types::Timestamp;
use ldr_telemetry::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn replicated_rows_carry_their_origin_timestamp() {
    init_test_tracing();
    let config = test_config(1);
    let store = MemoryKvStore::new();
    let handler = lww_handler(store.clone(), &config);

    let stats = handler
        .handle_batch(&[upsert(1, "alice", 10, 100), upsert(2, "bob", 20, 101)])
        .await
        .unwrap();

    assert_eq!(stats.rows_applied, 2);
    assert_eq!(stats.optimistic_inserts, 2);
    assert_eq!(stats.conditional_puts, 2);
    assert_eq!(stats.blind_puts, 0);

    let alice = store.get_committed(&user_key(1)).await.unwrap();
    assert_eq!(alice.value.row, Some(user_row("alice", 10)));
    assert_eq!(alice.value.origin_timestamp, Some(Timestamp::new(100, 0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn update_with_matching_previous_image_is_a_blind_put() {
    init_test_tracing();
    let config = test_config(1);
    let store = MemoryKvStore::new();
    let handler = lww_handler(store.clone(), &config);

    handler.handle_batch(&[upsert(1, "alice", 10, 100)]).await.unwrap();

    let update = upsert(1, "alice", 15, 110).with_prev(Some(user_row("alice", 10)), 100);
    let stats = handler.handle_batch(&[update]).await.unwrap();

    assert_eq!(stats.rows_applied, 1);
    assert_eq!(stats.blind_puts, 1);
    assert_eq!(stats.conditional_puts, 0);
    assert_eq!(
        store.get_committed(&user_key(1)).await.unwrap().value.row,
        Some(user_row("alice", 15))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn stale_change_loses_to_newer_local_write() {
    init_test_tracing();
    let config = test_config(1);
    let store = MemoryKvStore::new();
    let handler = lww_handler(store.clone(), &config);

    // Local clock values start at 1, so a source change at 0.x is older than any local write.
    store
        .write_local(user_key(1), Some(user_row("local", 1)))
        .await;
    let mut stale = upsert(1, "remote", 2, 0);
    stale.mvcc_timestamp = Timestamp::new(0, 5);

    let stats = handler.handle_batch(&[stale]).await.unwrap();

    assert_eq!(stats.rows_ignored, 1);
    assert_eq!(stats.rows_applied, 0);
    assert_eq!(
        store.get_committed(&user_key(1)).await.unwrap().value.row,
        Some(user_row("local", 1))
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn newer_delete_leaves_a_tombstone() {
    init_test_tracing();
    let config = test_config(1);
    let store = MemoryKvStore::new();
    let handler = lww_handler(store.clone(), &config);

    handler.handle_batch(&[upsert(1, "alice", 10, 100)]).await.unwrap();
    handler.handle_batch(&[delete(1, 200)]).await.unwrap();

    let version = store.get_committed(&user_key(1)).await.unwrap();
    assert!(version.is_tombstone());
    assert_eq!(version.replication_timestamp(), Timestamp::new(200, 0));

    // An older upsert arriving late does not resurrect the row.
    let stats = handler.handle_batch(&[upsert(1, "alice", 11, 150)]).await.unwrap();
    assert_eq!(stats.rows_ignored, 1);
    assert!(store.get_committed(&user_key(1)).await.unwrap().is_tombstone());
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_retries_count_each_write_once() {
    init_test_tracing();
    let config = test_config(1);
    let store = MemoryKvStore::new();
    let handler = lww_handler(store.clone(), &config);

    store.inject_txn_retries(2).await;
    let stats = handler
        .handle_batch(&[
            upsert(1, "alice", 10, 100),
            upsert(2, "bob", 20, 100),
            upsert(3, "carol", 30, 100),
        ])
        .await
        .unwrap();

    // Three attempts sent nine conditional puts, the logical transaction wrote three rows.
    assert_eq!(stats.conditional_puts, 3);
    let requests = store.request_counts().await;
    assert_eq!(requests.cputs, 9);
    assert_eq!(requests.retried_commits, 2);
    assert_eq!(requests.commits, 1);
    assert_eq!(store.scan().await.len(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_retries_give_up_after_configured_attempts() {
    init_test_tracing();
    let mut config = test_config(1);
    config.apply.max_txn_attempts = 2;
    let store = MemoryKvStore::new();
    let handler = lww_handler(store.clone(), &config);

    store.inject_txn_retries(5).await;
    let err = handler
        .handle_batch(&[upsert(1, "alice", 10, 100)])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransactionRetry);
    assert!(store.scan().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_event_fails_the_whole_batch() {
    init_test_tracing();
    let config = test_config(1);
    let store = MemoryKvStore::new();
    let handler = lww_handler(store.clone(), &config);

    let err = handler
        .handle_batch(&[upsert(1, "alice", 10, 100), undecodable(2, 100)])
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    assert!(store.scan().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn write_counts_depend_only_on_the_changes_and_strategy() {
    init_test_tracing();

    // (optimistic insert, updates carry a previous image, conditional puts, blind puts)
    let cases = [
        (true, true, 3, 2),
        (true, false, 5, 2),
        (false, true, 3, 2),
        (false, false, 3, 2),
    ];

    for (optimistic, with_prev, expected_cputs, expected_puts) in cases {
        let mut config = test_config(1);
        config.apply.optimistic_insert = optimistic;
        let store = MemoryKvStore::new();
        let handler = lww_handler(store.clone(), &config);

        let inserts = [
            upsert(1, "alice", 10, 100),
            upsert(2, "bob", 20, 100),
            upsert(3, "carol", 30, 100),
        ];
        let updates = [(1, "alice", 11), (2, "bob", 21)].map(|(id, name, balance)| {
            let update = upsert(id, name, balance, 200);
            if with_prev {
                update.with_prev(Some(user_row(name, balance - 1)), 100)
            } else {
                update
            }
        });

        let mut stats = handler.handle_batch(&inserts).await.unwrap();
        stats += handler.handle_batch(&updates).await.unwrap();

        assert_eq!(
            (stats.conditional_puts, stats.blind_puts),
            (expected_cputs, expected_puts),
            "optimistic insert: {optimistic}, previous image: {with_prev}"
        );
        assert_eq!(stats.rows_applied, 5);
    }
}

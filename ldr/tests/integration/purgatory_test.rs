use ldr::error::{ErrorKind, RetryEligibility};
use ldr::ldr_error;
use ldr::test_utils::pipeline::test_config;
use ldr::test_utils::table::{undecodable, upsert, user_key};
use ldr::test_utils::wait_for;
use ldr::types::{Datum, Timestamp};
use ldr_telemetry::init_test_tracing;
use rand::random;

use crate::common::{TestCluster, WAIT_TIMEOUT};

#[tokio::test(flavor = "multi_thread")]
async fn full_purgatory_evicts_oldest_failure_to_dead_letter_queue() {
    init_test_tracing();
    let job_id: u64 = random();
    let mut config = test_config(job_id);
    config.purgatory.byte_limit = 1;
    let cluster = TestCluster::new(&config, [1]);
    cluster
        .handler
        .fail_keys(
            [user_key(1), user_key(2), user_key(4), user_key(5)],
            ldr_error!(ErrorKind::KvUnavailable, "Injected unavailability"),
        )
        .await;

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();
    let tracker = &pipeline.tracker().unwrap().clone();
    let metrics = &pipeline.metrics().clone();
    let dlq = &cluster.dlq;
    let store = &cluster.store;

    cluster
        .source
        .push_events(
            1,
            vec![
                upsert(1, "alice", 10, 100),
                upsert(2, "bob", 20, 101),
                upsert(3, "carol", 30, 102),
            ],
        )
        .await;
    cluster.source.push_checkpoint(1, Timestamp::new(200, 0)).await;

    // One failure fills a one byte purgatory, the second one evicts it.
    wait_for(WAIT_TIMEOUT, move || async move {
        dlq.len().await == 1
            && metrics.purgatory_events() == 1
            && store.get_committed(&user_key(3)).await.is_some()
    })
    .await;

    let records = dlq.records().await;
    assert_eq!(records[0].job_id, job_id);
    assert_eq!(records[0].error_kind, ErrorKind::KvUnavailable);
    assert_eq!(records[0].eligibility, RetryEligibility::Retryable);
    let row = records[0].row.as_ref().unwrap();
    assert_eq!(row.get("name"), Some(&Datum::String("alice".to_owned())));
    assert_eq!(metrics.snapshot().dlq_events, 1);
    assert!(metrics.purgatory_bytes() >= 1);
    // "bob" is still waiting, so the checkpoint is held back.
    assert!(tracker.current() < Some(Timestamp::new(200, 0)));

    // With room to spare, further failures accumulate without growing the dead letter queue.
    pipeline.settings().set_purgatory_byte_limit(1 << 20);
    cluster
        .source
        .push_events(1, vec![upsert(4, "dave", 40, 250), upsert(5, "erin", 50, 251)])
        .await;
    cluster.source.push_checkpoint(1, Timestamp::new(300, 0)).await;

    wait_for(WAIT_TIMEOUT, move || async move {
        metrics.purgatory_events() == 3
    })
    .await;
    assert_eq!(dlq.len().await, 1);
    assert!(tracker.current() < Some(Timestamp::new(200, 0)));

    cluster.handler.clear_failures().await;
    wait_for(WAIT_TIMEOUT, move || async move {
        tracker.current() == Some(Timestamp::new(300, 0))
    })
    .await;
    assert_eq!(metrics.purgatory_events(), 0);
    assert_eq!(metrics.purgatory_bytes(), 0);
    assert_eq!(dlq.len().await, 1);
    for id in [2, 4, 5] {
        assert!(cluster.store.get_committed(&user_key(id)).await.is_some());
    }
    assert!(cluster.store.get_committed(&user_key(1)).await.is_none());

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_events_skip_purgatory() {
    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();
    let tracker = &pipeline.tracker().unwrap().clone();
    let metrics = &pipeline.metrics().clone();

    cluster
        .source
        .push_events(1, vec![undecodable(1, 100), upsert(2, "bob", 20, 101)])
        .await;
    cluster.source.push_checkpoint(1, Timestamp::new(120, 0)).await;

    wait_for(WAIT_TIMEOUT, move || async move {
        tracker.current() == Some(Timestamp::new(120, 0))
    })
    .await;

    let records = cluster.dlq.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_kind, ErrorKind::SchemaMismatch);
    assert_eq!(records[0].eligibility, RetryEligibility::NotRetryable);
    assert_eq!(records[0].row, None);
    assert_eq!(metrics.purgatory_events(), 0);
    assert!(cluster.store.get_committed(&user_key(2)).await.is_some());

    pipeline.shutdown_and_wait().await.unwrap();
}

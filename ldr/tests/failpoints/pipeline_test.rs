use fail::FailScenario;
use ldr::checkpoint::JobStatus;
use ldr::error::{ErrorKind, RetryEligibility};
use ldr::failpoints::{BATCH_HANDLER__BEFORE_COMMIT, PIPELINE__FLOW_START};
use ldr::test_utils::pipeline::test_config;
use ldr::test_utils::table::{upsert, user_key};
use ldr::test_utils::wait_for;
use ldr::types::Timestamp;
use ldr_telemetry::init_test_tracing;
use rand::random;
use tokio::sync::mpsc;

use crate::common::{TestCluster, WAIT_TIMEOUT};

#[tokio::test(flavor = "multi_thread")]
async fn retryable_commit_failure_holds_events_in_purgatory() {
    let _scenario = FailScenario::setup();
    fail::cfg(BATCH_HANDLER__BEFORE_COMMIT, "return(retry)").unwrap();

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
        .push_events(1, vec![upsert(1, "alice", 10, 100)])
        .await;
    cluster.source.push_checkpoint(1, Timestamp::new(100, 0)).await;

    wait_for(WAIT_TIMEOUT, move || async move {
        metrics.purgatory_events() == 1
    })
    .await;
    assert_eq!(tracker.current(), None);

    fail::remove(BATCH_HANDLER__BEFORE_COMMIT);
    wait_for(WAIT_TIMEOUT, move || async move {
        tracker.current() == Some(Timestamp::new(100, 0))
    })
    .await;
    assert!(cluster.store.get_committed(&user_key(1)).await.is_some());
    assert!(cluster.dlq.is_empty().await);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn non_retryable_commit_failure_dead_letters_events() {
    let _scenario = FailScenario::setup();
    fail::cfg(BATCH_HANDLER__BEFORE_COMMIT, "return(no_retry)").unwrap();

    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();
    let tracker = &pipeline.tracker().unwrap().clone();

    cluster
        .source
        .push_events(1, vec![upsert(1, "alice", 10, 100)])
        .await;
    cluster.source.push_checkpoint(1, Timestamp::new(100, 0)).await;

    wait_for(WAIT_TIMEOUT, move || async move {
        tracker.current() == Some(Timestamp::new(100, 0))
    })
    .await;

    let records = cluster.dlq.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error_kind, ErrorKind::WithNoRetry);
    assert_eq!(records[0].eligibility, RetryEligibility::NotRetryable);
    assert!(cluster.store.get_committed(&user_key(1)).await.is_none());

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn writer_panic_restarts_the_flow() {
    let _scenario = FailScenario::setup();
    fail::cfg(BATCH_HANDLER__BEFORE_COMMIT, "1*panic").unwrap();

    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);

    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
    let mut pipeline = cluster.pipeline(config).with_retry_observer(observer_tx);
    pipeline.start().await.unwrap();

    cluster
        .source
        .push_events(1, vec![upsert(1, "alice", 10, 100)])
        .await;

    let err = observer_rx.recv().await.unwrap();
    assert_eq!(err.kind(), ErrorKind::WriterWorkerPanic);

    // The restarted flow receives the event again and applies it.
    cluster.handler.wait_for_applied(1).await.notified().await;
    assert!(cluster.store.get_committed(&user_key(1)).await.is_some());

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn retryable_flow_start_failure_restarts_the_flow() {
    let _scenario = FailScenario::setup();
    fail::cfg(PIPELINE__FLOW_START, "1*return(retry)").unwrap();

    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);

    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
    let mut pipeline = cluster.pipeline(config).with_retry_observer(observer_tx);
    pipeline.start().await.unwrap();

    let err = observer_rx.recv().await.unwrap();
    assert_eq!(err.kind(), ErrorKind::WithRetry);

    let source = &cluster.source;
    wait_for(WAIT_TIMEOUT, move || async move {
        source.plan_calls().await.len() == 1
    })
    .await;
    assert_eq!(pipeline.metrics().snapshot().flow_restarts, 1);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn non_retryable_flow_start_failure_fails_the_job() {
    let _scenario = FailScenario::setup();
    fail::cfg(PIPELINE__FLOW_START, "return(no_retry)").unwrap();

    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WithNoRetry);
    assert!(cluster.source.plan_calls().await.is_empty());

    let progress = cluster.progress.get(job_id).await.unwrap();
    assert!(matches!(progress.status, JobStatus::Failed { .. }));
}

use ldr::checkpoint::JobStatus;
use ldr::error::ErrorKind;
use ldr::ldr_error;
use ldr::test_utils::pipeline::test_config;
use ldr::test_utils::table::{upsert, user_key};
use ldr::test_utils::wait_for;
use ldr::types::Timestamp;
use ldr_config::shared::CursorConfig;
use ldr_telemetry::init_test_tracing;
use rand::random;

use crate::common::{TestCluster, WAIT_TIMEOUT};

#[tokio::test(flavor = "multi_thread")]
async fn replicated_time_waits_for_events_in_purgatory() {
    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);
    cluster
        .handler
        .fail_keys(
            [user_key(2)],
            ldr_error!(ErrorKind::KvUnavailable, "Injected unavailability"),
        )
        .await;

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();
    let tracker = &pipeline.tracker().unwrap().clone();
    let metrics = &pipeline.metrics().clone();

    cluster
        .source
        .push_events(1, vec![upsert(1, "alice", 10, 100), upsert(2, "bob", 20, 101)])
        .await;
    cluster.source.push_checkpoint(1, Timestamp::new(150, 0)).await;

    cluster.handler.wait_for_applied(1).await.notified().await;
    wait_for(WAIT_TIMEOUT, move || async move { metrics.purgatory_events() == 1 }).await;

    // The checkpoint is held back while bob waits in purgatory.
    let progress = &cluster.progress;
    wait_for(WAIT_TIMEOUT, move || async move {
        progress.get(job_id).await.map(|progress| progress.status)
            == Some(JobStatus::Running {
                purgatory_events: 1,
            })
    })
    .await;
    assert_eq!(tracker.current(), None);

    cluster.handler.clear_failures().await;
    wait_for(WAIT_TIMEOUT, move || async move {
        tracker.current() == Some(Timestamp::new(150, 0))
    })
    .await;
    assert_eq!(metrics.purgatory_events(), 0);
    assert!(cluster.store.get_committed(&user_key(2)).await.is_some());

    pipeline.shutdown_and_wait().await.unwrap();

    let progress = cluster.progress.get(job_id).await.unwrap();
    assert_eq!(progress.replicated_time, Some(Timestamp::new(150, 0)));
    assert_eq!(progress.status, JobStatus::Canceled);
}

#[tokio::test(flavor = "multi_thread")]
async fn restarted_job_resumes_from_persisted_replicated_time() {
    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);

    let mut pipeline = cluster.pipeline(config.clone());
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
    pipeline.shutdown_and_wait().await.unwrap();

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();

    cluster
        .source
        .push_events(1, vec![upsert(2, "bob", 20, 120)])
        .await;
    cluster.handler.wait_for_applied(2).await.notified().await;

    // The replayed change at 100 was already covered, only bob is applied again.
    let applied = cluster.handler.applied_events().await;
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[1].key, user_key(2));

    let plan_calls = cluster.source.plan_calls().await;
    assert_eq!(plan_calls, vec![Timestamp::MIN, Timestamp::new(100, 0)]);
    let subscriptions = cluster.source.subscriptions().await;
    assert_eq!(subscriptions.last(), Some(&(1, Timestamp::new(100, 0))));

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cursor_sets_the_starting_point_of_a_new_job() {
    init_test_tracing();
    let job_id: u64 = random();
    let mut config = test_config(job_id);
    config.cursor = Some(CursorConfig {
        wall_time: 50,
        logical: 0,
    });
    let cluster = TestCluster::new(&config, [1]);

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();

    cluster
        .source
        .push_events(
            1,
            vec![upsert(1, "before", 1, 40), upsert(2, "after", 2, 60)],
        )
        .await;
    cluster.handler.wait_for_applied(1).await.notified().await;

    let applied = cluster.handler.applied_events().await;
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].key, user_key(2));
    assert_eq!(
        cluster.source.plan_calls().await,
        vec![Timestamp::new(50, 0)]
    );
    assert!(cluster.store.get_committed(&user_key(1)).await.is_none());

    pipeline.shutdown_and_wait().await.unwrap();
}

use std::time::Duration;

use ldr::checkpoint::JobStatus;
use ldr::error::ErrorKind;
use ldr::source::{NodeTopology, StreamStatus};
use ldr::test_utils::pipeline::test_config;
use ldr::test_utils::source::plan_with_partitions;
use ldr::test_utils::table::{undecodable, upsert, user_key};
use ldr::test_utils::wait_for;
use ldr::types::Timestamp;
use ldr_telemetry::init_test_tracing;
use rand::random;
use tokio::sync::mpsc;

use crate::common::{TestCluster, WAIT_TIMEOUT};

#[tokio::test(flavor = "multi_thread")]
async fn events_from_every_partition_are_applied() {
    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1, 2, 3]);

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();
    let tracker = &pipeline.tracker().unwrap().clone();

    for partition_id in [1, 2, 3] {
        let id = i64::from(partition_id);
        cluster
            .source
            .push_events(partition_id, vec![upsert(id, "user", id, 100 + id)])
            .await;
    }
    cluster.source.push_checkpoint(1, Timestamp::new(300, 0)).await;
    cluster.source.push_checkpoint(2, Timestamp::new(200, 0)).await;

    cluster.handler.wait_for_applied(3).await.notified().await;

    // Partition 3 has not checkpointed yet, the job has not replicated anything.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tracker.current(), None);

    cluster.source.push_checkpoint(3, Timestamp::new(250, 0)).await;
    wait_for(WAIT_TIMEOUT, move || async move {
        tracker.current() == Some(Timestamp::new(200, 0))
    })
    .await;

    let metrics = pipeline.metrics().snapshot();
    assert_eq!(metrics.rows_applied, 3);
    assert_eq!(metrics.optimistic_inserts, 3);
    assert_eq!(cluster.store.scan().await.len(), 3);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeats_report_the_replicated_time() {
    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();

    cluster.source.push_checkpoint(1, Timestamp::new(500, 0)).await;

    let producer = &cluster.producer;
    wait_for(WAIT_TIMEOUT, move || async move {
        producer
            .heartbeats()
            .await
            .contains(&Some(Timestamp::new(500, 0)))
    })
    .await;

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn inactive_producer_stream_restarts_the_flow() {
    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let stream_id = config.stream_id.clone();
    let cluster = TestCluster::new(&config, [1]);
    cluster.producer.set_status(StreamStatus::Paused).await;

    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
    let mut pipeline = cluster.pipeline(config).with_retry_observer(observer_tx);
    pipeline.start().await.unwrap();

    let err = observer_rx.recv().await.unwrap();
    assert_eq!(err.kind(), ErrorKind::ProducerUnavailable);
    assert!(err.to_string().contains(&format!(
        "replication stream {stream_id} is not running, status is STREAM_PAUSED"
    )));

    cluster.producer.set_status(StreamStatus::Active).await;
    let source = &cluster.source;
    wait_for(WAIT_TIMEOUT, move || async move {
        source.plan_calls().await.len() >= 2
    })
    .await;

    // The restarted flow applies new changes.
    cluster
        .source
        .push_events(1, vec![upsert(1, "alice", 10, 100)])
        .await;
    cluster.handler.wait_for_applied(1).await.notified().await;
    assert!(pipeline.metrics().snapshot().flow_restarts >= 1);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn new_nodes_trigger_a_replan() {
    init_test_tracing();
    let job_id: u64 = random();
    let mut config = test_config(job_id);
    config.replan.threshold = 0.4;
    let cluster = TestCluster::new(&config, [1]);

    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
    let mut pipeline = cluster.pipeline(config).with_retry_observer(observer_tx);
    pipeline.start().await.unwrap();

    // Two of the three nodes now holding leases are missing from the plan.
    cluster.source.set_plan(plan_with_partitions([1, 2, 3])).await;
    cluster
        .topology
        .set_topology(
            NodeTopology::default()
                .with_node(1, "producer-1:26257", 1)
                .with_node(2, "producer-2:26257", 1)
                .with_node(3, "producer-3:26257", 1),
        )
        .await;

    let err = observer_rx.recv().await.unwrap();
    assert_eq!(err.kind(), ErrorKind::PlanChanged);

    let source = &cluster.source;
    wait_for(WAIT_TIMEOUT, move || async move {
        source
            .subscriptions()
            .await
            .iter()
            .any(|(partition_id, _)| *partition_id == 3)
    })
    .await;

    // The new plan covers every node, so no further replan is requested.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(observer_rx.try_recv().is_err());

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_restarts_fail_the_job() {
    init_test_tracing();
    let job_id: u64 = random();
    let mut config = test_config(job_id);
    config.retry.max_attempts = 2;
    let cluster = TestCluster::new(&config, [1]);
    cluster.producer.set_status(StreamStatus::Inactive).await;

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();
    let metrics = pipeline.metrics().clone();

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProducerUnavailable);
    assert_eq!(metrics.snapshot().flow_restarts, 2);
    assert_eq!(cluster.source.plan_calls().await.len(), 3);

    let progress = cluster.progress.get(job_id).await.unwrap();
    assert!(matches!(progress.status, JobStatus::Failed { .. }));
}

#[tokio::test(flavor = "multi_thread")]
async fn dead_letter_queue_failure_fails_the_job() {
    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);
    cluster.dlq.fail_writes(true).await;

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();

    cluster
        .source
        .push_events(1, vec![undecodable(1, 100)])
        .await;

    let err = pipeline.wait().await.unwrap_err();
    assert!(err.kinds().contains(&ErrorKind::DeadLetterQueueWriteFailed));
    assert!(!err.restarts_flow());

    let progress = cluster.progress.get(job_id).await.unwrap();
    assert!(matches!(progress.status, JobStatus::Failed { .. }));
    assert_eq!(progress.replicated_time, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn canceled_job_reports_canceled_status() {
    init_test_tracing();
    let job_id: u64 = random();
    let config = test_config(job_id);
    let cluster = TestCluster::new(&config, [1]);

    let mut pipeline = cluster.pipeline(config);
    pipeline.start().await.unwrap();

    cluster
        .source
        .push_events(1, vec![upsert(1, "alice", 10, 100)])
        .await;
    cluster.handler.wait_for_applied(1).await.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();

    let progress = cluster.progress.get(job_id).await.unwrap();
    assert_eq!(progress.status, JobStatus::Canceled);
    assert!(cluster.store.get_committed(&user_key(1)).await.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_configuration_is_rejected_on_start() {
    init_test_tracing();
    let mut config = test_config(random());
    config.batch.max_size = 0;
    let cluster = TestCluster::new(&config, [1]);

    let mut pipeline = cluster.pipeline(config);
    let err = pipeline.start().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert!(pipeline.tracker().is_none());
    assert!(cluster.source.plan_calls().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_plan_restarts_until_partitions_appear() {
    init_test_tracing();
    let job_id: u64 = random();
    let mut config = test_config(job_id);
    config.retry.max_attempts = 10;
    let cluster = TestCluster::new(&config, []);

    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();
    let mut pipeline = cluster.pipeline(config).with_retry_observer(observer_tx);
    pipeline.start().await.unwrap();

    let err = observer_rx.recv().await.unwrap();
    assert_eq!(err.kind(), ErrorKind::SourceError);

    cluster.source.set_plan(plan_with_partitions([1])).await;
    cluster
        .source
        .push_events(1, vec![upsert(1, "alice", 10, 100)])
        .await;
    cluster.handler.wait_for_applied(1).await.notified().await;

    pipeline.shutdown_and_wait().await.unwrap();
}

#[derive(Clone, Default)]
struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'w> tracing_subscriber::fmt::MakeWriter<'w> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'w self) -> Self::Writer {
        self.clone()
    }
}

// A single threaded runtime keeps every worker on the thread the subscriber is set on.
#[tokio::test(flavor = "current_thread")]
async fn job_logs_are_tagged_with_the_job_id() {
    let logs = CapturedLogs::default();
    let _subscriber = tracing::subscriber::set_default(ldr_telemetry::json_subscriber(
        tracing_subscriber::EnvFilter::new("info"),
        logs.clone(),
    ));

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
    cluster.source.push_checkpoint(1, Timestamp::new(150, 0)).await;
    wait_for(WAIT_TIMEOUT, move || async move {
        tracker.current() == Some(Timestamp::new(150, 0))
    })
    .await;
    pipeline.shutdown_and_wait().await.unwrap();

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<serde_json::Value> = output
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();

    let writer_started = lines
        .iter()
        .find(|line| line["fields"]["message"] == "starting writer worker")
        .expect("writer start is logged");
    assert_eq!(writer_started["spans"][0]["name"], "ingestion_job");
    assert_eq!(writer_started["spans"][0]["job_id"], job_id);

    // Everything the workers log runs under the job span.
    for line in lines.iter().filter(|line| line["spans"].is_array()) {
        assert_eq!(line["spans"][0]["job_id"], job_id, "untagged line: {line}");
    }
}

use bytes::Bytes;
use ldr_config::shared::{BatchConfig, IngestionConfig, RetryConfig};

use crate::applier::RowApplier;
use crate::checkpoint::ProgressStore;
use crate::dlq::DeadLetterQueue;
use crate::handler::{BatchHandler, KvBatchHandler};
use crate::kv::memory::MemoryKvStore;
use crate::pipeline::Pipeline;
use crate::resolver::LwwResolver;
use crate::source::{ChangeSource, ProducerClient, TopologyProvider};
use crate::test_utils::table::users_decoder;
use crate::types::JobId;

/// A job configuration with short intervals, suited to tests.
pub fn test_config(job_id: JobId) -> IngestionConfig {
    let mut config = IngestionConfig::new(job_id, format!("test-stream-{job_id}"));
    config.batch = BatchConfig {
        max_size: 16,
        max_fill_ms: 10,
    };
    config.purgatory.flush_interval_ms = 20;
    config.heartbeat.frequency_ms = 50;
    config.replan.frequency_ms = 50;
    config.checkpoint.frequency_ms = 20;
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff_factor: 2.0,
    };

    config
}

/// A [`KvBatchHandler`] resolving conflicts on the users table with last-writer-wins.
pub fn lww_handler(
    store: MemoryKvStore,
    config: &IngestionConfig,
) -> KvBatchHandler<MemoryKvStore, LwwResolver> {
    let applier = RowApplier::new(LwwResolver, users_decoder(), &config.apply);
    KvBatchHandler::new(store, applier, config.apply.max_txn_attempts)
}

#[allow(clippy::too_many_arguments)]
pub fn create_pipeline<S, P, T, H, Q, G>(
    config: IngestionConfig,
    source: S,
    producer: P,
    topology: T,
    handler: H,
    dlq: Q,
    progress_store: G,
) -> Pipeline<S, P, T, H, Q, G>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    P: ProducerClient + Clone + Send + Sync + 'static,
    T: TopologyProvider + Clone + Send + Sync + 'static,
    H: BatchHandler + Clone + Send + Sync + 'static,
    Q: DeadLetterQueue + Clone + Send + Sync + 'static,
    G: ProgressStore + Clone + Send + Sync + 'static,
{
    Pipeline::new(
        config,
        source,
        producer,
        topology,
        handler,
        dlq,
        progress_store,
    )
}

/// Live rows of `store`, sorted by key, for comparing the contents of two clusters.
///
/// Origin timestamps and local commit timestamps are left out, since they legitimately differ
/// between clusters holding the same rows.
pub async fn fingerprint(store: &MemoryKvStore) -> Vec<(Bytes, Bytes)> {
    store
        .scan()
        .await
        .into_iter()
        .filter_map(|(key, version)| version.value.row.map(|row| (key, row)))
        .collect()
}

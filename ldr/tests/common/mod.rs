//! In-memory wiring of an ingestion job shared by the integration and failpoint tests.

use std::time::Duration;

use ldr::checkpoint::MemoryProgressStore;
use ldr::dlq::MemoryDeadLetterQueue;
use ldr::handler::KvBatchHandler;
use ldr::kv::memory::MemoryKvStore;
use ldr::pipeline::Pipeline;
use ldr::resolver::LwwResolver;
use ldr::source::{NodeTopology, PartitionId};
use ldr::test_utils::control::{ScriptedProducer, ScriptedTopology};
use ldr::test_utils::handler::ControllableBatchHandler;
use ldr::test_utils::pipeline::{create_pipeline, lww_handler};
use ldr::test_utils::source::{MemoryChangeSource, plan_with_partitions};
use ldr_config::shared::IngestionConfig;

pub type TestHandler = ControllableBatchHandler<KvBatchHandler<MemoryKvStore, LwwResolver>>;

pub type TestPipeline = Pipeline<
    MemoryChangeSource,
    ScriptedProducer,
    ScriptedTopology,
    TestHandler,
    MemoryDeadLetterQueue,
    MemoryProgressStore,
>;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer, local cluster and job state of one test job.
#[derive(Debug, Clone)]
pub struct TestCluster {
    pub store: MemoryKvStore,
    pub source: MemoryChangeSource,
    pub producer: ScriptedProducer,
    pub topology: ScriptedTopology,
    pub handler: TestHandler,
    pub dlq: MemoryDeadLetterQueue,
    pub progress: MemoryProgressStore,
}

impl TestCluster {
    /// A cluster consuming `partitions`, each planned on the node of the same id.
    pub fn new(config: &IngestionConfig, partitions: impl IntoIterator<Item = PartitionId>) -> Self {
        let plan = plan_with_partitions(partitions);
        let topology = plan
            .partitions
            .iter()
            .fold(NodeTopology::default(), |topology, partition| {
                topology.with_node(partition.node_id, partition.address.clone(), 1)
            });

        let store = MemoryKvStore::new();
        Self {
            handler: ControllableBatchHandler::wrap(lww_handler(store.clone(), config)),
            store,
            source: MemoryChangeSource::new(plan),
            producer: ScriptedProducer::new(),
            topology: ScriptedTopology::new(topology),
            dlq: MemoryDeadLetterQueue::new(),
            progress: MemoryProgressStore::new(),
        }
    }

    pub fn pipeline(&self, config: IngestionConfig) -> TestPipeline {
        create_pipeline(
            config,
            self.source.clone(),
            self.producer.clone(),
            self.topology.clone(),
            self.handler.clone(),
            self.dlq.clone(),
            self.progress.clone(),
        )
    }
}

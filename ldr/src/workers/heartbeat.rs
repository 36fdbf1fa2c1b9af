use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, warn};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, wait_for_shutdown};
use crate::error::{ErrorKind, LdrError, LdrResult};
use crate::settings::DynamicSettings;
use crate::source::{ProducerClient, StreamStatus};
use crate::types::Timestamp;
use crate::workers::base::{Worker, WorkerHandle, WorkerType, join_worker};

/// Handle of a worker watching the flow from the side, ending with an error when the flow must be
/// rebuilt.
#[derive(Debug)]
pub struct MonitorWorkerHandle {
    worker_type: WorkerType,
    handle: Option<JoinHandle<LdrResult<()>>>,
}

impl MonitorWorkerHandle {
    pub(crate) fn new(worker_type: WorkerType, handle: JoinHandle<LdrResult<()>>) -> Self {
        Self {
            worker_type,
            handle: Some(handle),
        }
    }
}

impl WorkerHandle<WorkerType> for MonitorWorkerHandle {
    fn state(&self) -> WorkerType {
        self.worker_type
    }

    async fn wait(mut self) -> LdrResult<()> {
        join_worker(
            self.worker_type,
            self.handle.take(),
            ErrorKind::MonitorWorkerPanic,
        )
        .await
    }
}

/// Periodically reports the replicated time to the producer and checks that its stream is active.
#[derive(Debug)]
pub struct HeartbeatWorker<P> {
    stream_id: String,
    producer: P,
    settings: DynamicSettings,
    replicated_time: watch::Receiver<Option<Timestamp>>,
    shutdown_rx: ShutdownRx,
}

impl<P> HeartbeatWorker<P> {
    pub fn new(
        stream_id: String,
        producer: P,
        settings: DynamicSettings,
        replicated_time: watch::Receiver<Option<Timestamp>>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            stream_id,
            producer,
            settings,
            replicated_time,
            shutdown_rx,
        }
    }
}

impl<P> HeartbeatWorker<P>
where
    P: ProducerClient,
{
    async fn run(mut self) -> LdrResult<()> {
        loop {
            let frequency = self.settings.snapshot().heartbeat_frequency;
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    info!("heartbeat worker stopped by shutdown");
                    return Ok(());
                }
                _ = tokio::time::sleep(frequency) => {}
            }

            let frontier = *self.replicated_time.borrow();
            let status = self.producer.heartbeat(&self.stream_id, frontier).await?;
            check_status(&self.stream_id, status)?;

            debug!(stream_id = %self.stream_id, ?frontier, "heartbeat acknowledged");
        }
    }
}

/// Fails with [`ErrorKind::ProducerUnavailable`] unless the producer stream is active.
pub fn check_status(stream_id: &str, status: StreamStatus) -> LdrResult<()> {
    if status != StreamStatus::Active {
        warn!(stream_id, %status, "producer stream is not active");
        bail!(
            ErrorKind::ProducerUnavailable,
            "Producer stream is not active",
            format!("replication stream {stream_id} is not running, status is {status}")
        );
    }

    Ok(())
}

impl<P> Worker<MonitorWorkerHandle, WorkerType> for HeartbeatWorker<P>
where
    P: ProducerClient + Send + Sync + 'static,
{
    type Error = LdrError;

    async fn start(self) -> LdrResult<MonitorWorkerHandle> {
        info!(stream_id = %self.stream_id, "starting heartbeat worker");

        let span = tracing::info_span!("heartbeat_worker", stream_id = %self.stream_id);
        let handle = tokio::spawn(self.run().instrument(span));

        Ok(MonitorWorkerHandle::new(WorkerType::Heartbeat, handle))
    }
}

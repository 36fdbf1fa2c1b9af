use std::panic::AssertUnwindSafe;
use std::slice;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use ldr_config::shared::IngestionConfig;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, error, info};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::concurrency::stream::TimeoutBatchStream;
use crate::dlq::DeadLetterQueue;
use crate::error::{ErrorKind, LdrError, LdrResult};
use crate::handler::BatchHandler;
use crate::ldr_error;
use crate::metrics::IngestionMetrics;
use crate::purgatory::Purgatory;
use crate::settings::DynamicSettings;
use crate::source::{ChangeSource, FlowPartition, PartitionId, StreamMessage};
use crate::types::{ChangeEvent, JobId, Timestamp};
use crate::workers::base::{Worker, WorkerHandle, WorkerType, join_worker};
use crate::workers::pool::WriterWorkerPool;

/// A checkpoint released by a writer: every change of the partition up to the timestamp has been
/// applied or dead-lettered.
pub type ReleasedCheckpoint = (PartitionId, Timestamp);

/// State of a writer shared with the rest of the flow.
#[derive(Debug, Clone)]
pub struct WriterWorkerState {
    partition_id: PartitionId,
    purgatory: Arc<Mutex<Purgatory>>,
}

impl WriterWorkerState {
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn purgatory(&self) -> &Arc<Mutex<Purgatory>> {
        &self.purgatory
    }
}

#[derive(Debug)]
pub struct WriterWorkerHandle {
    state: WriterWorkerState,
    handle: Option<JoinHandle<LdrResult<()>>>,
}

impl WriterWorkerHandle {
    pub fn partition_id(&self) -> PartitionId {
        self.state.partition_id
    }
}

impl WorkerHandle<WriterWorkerState> for WriterWorkerHandle {
    fn state(&self) -> WriterWorkerState {
        self.state.clone()
    }

    async fn wait(mut self) -> LdrResult<()> {
        let worker_type = WorkerType::Writer {
            partition_id: self.state.partition_id,
        };

        join_worker(worker_type, self.handle.take(), ErrorKind::WriterWorkerPanic).await
    }
}

/// Applies the change stream of one partition.
///
/// Events are applied in batches. Events of a failed batch are retried one by one so only the
/// failing ones are parked in purgatory, which is retried on a fixed interval. Checkpoints of the
/// stream go through purgatory and are reported once released.
#[derive(Debug)]
pub struct WriterWorker<S, H, Q> {
    job_id: JobId,
    config: Arc<IngestionConfig>,
    partition: FlowPartition,
    resume_from: Timestamp,
    source: S,
    handler: H,
    dlq: Q,
    settings: DynamicSettings,
    metrics: IngestionMetrics,
    pool: WriterWorkerPool,
    checkpoint_tx: mpsc::UnboundedSender<ReleasedCheckpoint>,
    shutdown_rx: ShutdownRx,
}

impl<S, H, Q> WriterWorker<S, H, Q> {
    pub fn partition_id(&self) -> PartitionId {
        self.partition.id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_id: JobId,
        config: Arc<IngestionConfig>,
        partition: FlowPartition,
        resume_from: Timestamp,
        source: S,
        handler: H,
        dlq: Q,
        settings: DynamicSettings,
        metrics: IngestionMetrics,
        pool: WriterWorkerPool,
        checkpoint_tx: mpsc::UnboundedSender<ReleasedCheckpoint>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            job_id,
            config,
            partition,
            resume_from,
            source,
            handler,
            dlq,
            settings,
            metrics,
            pool,
            checkpoint_tx,
            shutdown_rx,
        }
    }
}

impl<S, H, Q> Worker<WriterWorkerHandle, WriterWorkerState> for WriterWorker<S, H, Q>
where
    S: ChangeSource + Send + Sync + 'static,
    H: BatchHandler + Send + Sync + 'static,
    Q: DeadLetterQueue + Send + Sync + 'static,
{
    type Error = LdrError;

    async fn start(self) -> LdrResult<WriterWorkerHandle> {
        let partition_id = self.partition.id;
        info!(partition_id, "starting writer worker");

        let purgatory = Purgatory::new(
            self.job_id,
            self.settings.snapshot().purgatory_byte_limit,
            self.metrics.clone(),
        );
        let state = WriterWorkerState {
            partition_id,
            purgatory: Arc::new(Mutex::new(purgatory)),
        };

        let writer_span = tracing::info_span!(
            "writer_worker",
            job_id = self.job_id,
            partition_id,
            node_id = self.partition.node_id
        );

        let pool = self.pool.clone();
        let writer = WriterLoop {
            worker: self,
            purgatory: state.purgatory.clone(),
        };
        let writer = async move {
            let result = match AssertUnwindSafe(writer.run()).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(ldr_error!(
                    ErrorKind::WriterWorkerPanic,
                    "Writer worker panicked",
                    format!("partition {partition_id}")
                )),
            };

            match &result {
                Ok(()) => info!("writer worker completed"),
                Err(err) => error!(error = %err, "writer worker failed"),
            }

            pool.lock().await.mark_worker_finished(partition_id);

            result
        }
        .instrument(writer_span);

        Ok(WriterWorkerHandle {
            state,
            handle: Some(tokio::spawn(writer)),
        })
    }
}

struct WriterLoop<S, H, Q> {
    worker: WriterWorker<S, H, Q>,
    purgatory: Arc<Mutex<Purgatory>>,
}

impl<S, H, Q> WriterLoop<S, H, Q>
where
    S: ChangeSource + Send + Sync + 'static,
    H: BatchHandler + Send + Sync + 'static,
    Q: DeadLetterQueue + Send + Sync + 'static,
{
    async fn run(self) -> LdrResult<()> {
        let w = &self.worker;
        let stream = w.source.subscribe(&w.partition, w.resume_from).await?;
        let stream =
            TimeoutBatchStream::wrap(stream, w.config.batch.clone(), w.shutdown_rx.clone());
        tokio::pin!(stream);

        let flush_period = Duration::from_millis(w.config.purgatory.flush_interval_ms);
        let mut flush = interval_at(Instant::now() + flush_period, flush_period);
        flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut settings_rx = w.settings.subscribe();

        loop {
            tokio::select! {
                biased;

                _ = flush.tick() => {
                    let released = {
                        let mut purgatory = self.purgatory.lock().await;
                        purgatory.drain(&w.handler, &w.dlq).await?
                    };
                    self.release(released);
                }

                Ok(()) = settings_rx.changed() => {
                    let byte_limit = settings_rx.borrow_and_update().purgatory_byte_limit;
                    self.purgatory.lock().await.set_byte_limit(byte_limit);
                }

                batch = stream.next() => match batch {
                    Some(ShutdownResult::Ok(messages)) => self.handle_messages(messages).await?,
                    Some(ShutdownResult::Shutdown(_)) => {
                        info!("writer worker stopped by shutdown");
                        return Ok(());
                    }
                    None => {
                        bail!(
                            ErrorKind::SourceError,
                            "Change stream ended unexpectedly",
                            format!("partition {}", w.partition.id)
                        );
                    }
                },
            }
        }
    }

    async fn handle_messages(&self, messages: Vec<LdrResult<StreamMessage>>) -> LdrResult<()> {
        let mut pending = Vec::new();

        for message in messages {
            match message? {
                StreamMessage::Events(events) => {
                    // Changes at or before the resume point were covered by a previous flow.
                    let resume_from = self.worker.resume_from;
                    pending.extend(
                        events
                            .into_iter()
                            .filter(|event| event.mvcc_timestamp > resume_from),
                    );
                }
                StreamMessage::Checkpoint(ts) => {
                    self.apply(std::mem::take(&mut pending)).await?;

                    let released = self.purgatory.lock().await.checkpoint(ts);
                    self.release(released);
                }
            }
        }

        self.apply(pending).await
    }

    async fn apply(&self, events: Vec<ChangeEvent>) -> LdrResult<()> {
        let w = &self.worker;
        for chunk in events.chunks(w.config.batch.max_size) {
            match w.handler.handle_batch(chunk).await {
                Ok(stats) => w.metrics.record_batch(&stats),
                Err(err) if chunk.len() > 1 => {
                    debug!(events = chunk.len(), error = %err, "batch failed, applying events one by one");

                    for event in chunk {
                        match w.handler.handle_batch(slice::from_ref(event)).await {
                            Ok(stats) => w.metrics.record_batch(&stats),
                            Err(err) => self.park(vec![event.clone()], err).await?,
                        }
                    }
                }
                Err(err) => self.park(chunk.to_vec(), err).await?,
            }
        }

        Ok(())
    }

    async fn park(&self, events: Vec<ChangeEvent>, reason: LdrError) -> LdrResult<()> {
        let w = &self.worker;
        let released = {
            let mut purgatory = self.purgatory.lock().await;
            purgatory.store(events, reason, &w.handler, &w.dlq).await?
        };
        self.release(released);

        Ok(())
    }

    fn release(&self, released: Option<Timestamp>) {
        let Some(ts) = released else {
            return;
        };

        // The receiver is only gone once the flow is stopping, and a new flow resumes from the
        // persisted replicated time anyway.
        if self
            .worker
            .checkpoint_tx
            .send((self.worker.partition.id, ts))
            .is_err()
        {
            debug!(%ts, "flow is stopping, dropping released checkpoint");
        }
    }
}

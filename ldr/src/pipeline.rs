//! Supervision of a logical replication ingestion job.
//!
//! A [`Pipeline`] runs the replication flow of one job: a writer per partition of the plan, a
//! heartbeat worker and a replanner worker. When the flow stops with a retryable error it is torn
//! down and rebuilt from the persisted replicated time, with exponential backoff. Other errors fail
//! the job.

use std::sync::Arc;
use std::time::Duration;

use ldr_config::shared::IngestionConfig;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, error, info, warn};

use crate::bail;
use crate::checkpoint::{FlowFrontier, JobStatus, ProgressStore, ReplicatedTimeTracker};
use crate::concurrency::shutdown::{
    ShutdownRx, ShutdownTx, create_shutdown_channel, wait_for_shutdown,
};
use crate::dlq::DeadLetterQueue;
use crate::error::{ErrorKind, LdrError, LdrResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{PIPELINE__FLOW_START, ldr_fail_point};
use crate::handler::BatchHandler;
use crate::ldr_error;
use crate::metrics::{IngestionMetrics, register_metrics};
use crate::settings::DynamicSettings;
use crate::source::{ChangeSource, FlowPlan, ProducerClient, TopologyProvider};
use crate::types::{JobId, Timestamp};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::heartbeat::HeartbeatWorker;
use crate::workers::pool::WriterWorkerPool;
use crate::workers::replanner::ReplannerWorker;
use crate::workers::writer::{ReleasedCheckpoint, WriterWorker};

#[derive(Debug)]
enum PipelineState<G> {
    NotStarted,
    Started {
        supervisor: JoinHandle<LdrResult<()>>,
        tracker: ReplicatedTimeTracker<G>,
    },
}

/// A logical replication ingestion job.
#[derive(Debug)]
pub struct Pipeline<S, P, T, H, Q, G> {
    config: Arc<IngestionConfig>,
    source: S,
    producer: P,
    topology: T,
    handler: H,
    dlq: Q,
    progress_store: G,
    settings: DynamicSettings,
    metrics: IngestionMetrics,
    retry_observer: Option<mpsc::UnboundedSender<LdrError>>,
    state: PipelineState<G>,
    shutdown_tx: ShutdownTx,
}

impl<S, P, T, H, Q, G> Pipeline<S, P, T, H, Q, G>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    P: ProducerClient + Clone + Send + Sync + 'static,
    T: TopologyProvider + Clone + Send + Sync + 'static,
    H: BatchHandler + Clone + Send + Sync + 'static,
    Q: DeadLetterQueue + Clone + Send + Sync + 'static,
    G: ProgressStore + Clone + Send + Sync + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: IngestionConfig,
        source: S,
        producer: P,
        topology: T,
        handler: H,
        dlq: Q,
        progress_store: G,
    ) -> Self {
        // Safe to call for every job, metrics are described only once.
        register_metrics();
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            settings: DynamicSettings::from(&config),
            metrics: IngestionMetrics::new(config.id),
            config: Arc::new(config),
            source,
            producer,
            topology,
            handler,
            dlq,
            progress_store,
            retry_observer: None,
            state: PipelineState::NotStarted,
            shutdown_tx,
        }
    }

    /// Sends every error that restarts the flow to `observer`.
    pub fn with_retry_observer(mut self, observer: mpsc::UnboundedSender<LdrError>) -> Self {
        self.retry_observer = Some(observer);
        self
    }

    pub fn id(&self) -> JobId {
        self.config.id
    }

    /// Settings of the job that can be changed while it runs.
    pub fn settings(&self) -> &DynamicSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &IngestionMetrics {
        &self.metrics
    }

    /// Replicated time of the job, available once started.
    pub fn tracker(&self) -> Option<&ReplicatedTimeTracker<G>> {
        match &self.state {
            PipelineState::Started { tracker, .. } => Some(tracker),
            PipelineState::NotStarted => None,
        }
    }

    /// Returns a handle for sending shutdown signals to this job.
    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Validates the configuration, loads the job progress and starts supervising the flow.
    pub async fn start(&mut self) -> LdrResult<()> {
        if matches!(self.state, PipelineState::Started { .. }) {
            bail!(ErrorKind::InvalidState, "Ingestion job already started");
        }

        self.config.validate()?;

        info!(
            job_id = self.config.id,
            stream_id = %self.config.stream_id,
            "starting ingestion job"
        );

        self.dlq.create().await?;
        let tracker =
            ReplicatedTimeTracker::load(self.config.id, self.progress_store.clone()).await?;

        let supervisor = Supervisor {
            config: self.config.clone(),
            source: self.source.clone(),
            producer: self.producer.clone(),
            topology: self.topology.clone(),
            handler: self.handler.clone(),
            dlq: self.dlq.clone(),
            settings: self.settings.clone(),
            metrics: self.metrics.clone(),
            tracker: tracker.clone(),
            retry_observer: self.retry_observer.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
        };

        let span = tracing::info_span!("ingestion_job", job_id = self.config.id);
        let supervisor = tokio::spawn(supervisor.run().instrument(span));

        self.state = PipelineState::Started {
            supervisor,
            tracker,
        };

        Ok(())
    }

    /// Waits for the job to stop.
    ///
    /// Returns `Ok(())` if the job was canceled and the error that failed it otherwise.
    pub async fn wait(self) -> LdrResult<()> {
        let PipelineState::Started { supervisor, .. } = self.state else {
            info!("ingestion job was not started, nothing to wait for");

            return Ok(());
        };

        supervisor.await.map_err(|err| {
            ldr_error!(
                ErrorKind::Unknown,
                "Ingestion job task did not complete",
                err
            )
        })?
    }

    /// Initiates the cancellation of the job without waiting for it to stop.
    pub fn shutdown(&self) {
        info!("trying to shut down the ingestion job");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the ingestion job: {}", err);
            return;
        }

        info!("shut down signal successfully sent to the ingestion job");
    }

    /// Cancels the job and waits for it to stop.
    pub async fn shutdown_and_wait(self) -> LdrResult<()> {
        self.shutdown();
        self.wait().await
    }
}

/// Runs flows until the job is canceled or fails.
struct Supervisor<S, P, T, H, Q, G> {
    config: Arc<IngestionConfig>,
    source: S,
    producer: P,
    topology: T,
    handler: H,
    dlq: Q,
    settings: DynamicSettings,
    metrics: IngestionMetrics,
    tracker: ReplicatedTimeTracker<G>,
    retry_observer: Option<mpsc::UnboundedSender<LdrError>>,
    shutdown_rx: ShutdownRx,
}

impl<S, P, T, H, Q, G> Supervisor<S, P, T, H, Q, G>
where
    S: ChangeSource + Clone + Send + Sync + 'static,
    P: ProducerClient + Clone + Send + Sync + 'static,
    T: TopologyProvider + Clone + Send + Sync + 'static,
    H: BatchHandler + Clone + Send + Sync + 'static,
    Q: DeadLetterQueue + Clone + Send + Sync + 'static,
    G: ProgressStore + Clone + Send + Sync + 'static,
{
    async fn run(mut self) -> LdrResult<()> {
        let mut attempts = 0;

        loop {
            let replicated_before = self.tracker.current();

            let err = match self.run_flow().await {
                Ok(()) => {
                    info!("ingestion job canceled");
                    self.tracker.set_status(JobStatus::Canceled).await?;

                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.restarts_flow() {
                error!(error = %err, "ingestion job failed");
                return Err(self.fail(err).await);
            }

            if let Some(observer) = &self.retry_observer {
                let _ = observer.send(err.clone());
            }

            // Progress since the previous restart means that the failures are not persistent.
            if self.tracker.current() > replicated_before {
                attempts = 0;
            }
            attempts += 1;

            if attempts > self.config.retry.max_attempts {
                error!(attempts, error = %err, "ingestion job exhausted its restarts");
                return Err(self.fail(err).await);
            }

            self.metrics.record_flow_restart();
            let delay = Duration::from_millis(self.config.retry.delay_for_attempt(attempts - 1));
            warn!(attempts, ?delay, error = %err, "restarting replication flow");

            if let Err(status_err) = self
                .tracker
                .set_status(JobStatus::Restarting {
                    reason: err.to_string(),
                })
                .await
            {
                warn!(error = %status_err, "failed to record restarting status");
            }

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    info!("ingestion job canceled while restarting");
                    self.tracker.set_status(JobStatus::Canceled).await?;

                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn fail(&self, err: LdrError) -> LdrError {
        let status = JobStatus::Failed {
            reason: err.to_string(),
        };
        if let Err(status_err) = self.tracker.set_status(status).await {
            warn!(error = %status_err, "failed to record failed status");
        }

        err
    }

    /// Runs one flow, returning `Ok(())` once the job is canceled.
    async fn run_flow(&self) -> LdrResult<()> {
        #[cfg(feature = "failpoints")]
        ldr_fail_point(PIPELINE__FLOW_START)?;

        let cursor = self.config.cursor.map(Timestamp::from);
        let resume_from = self.tracker.resume_timestamp(cursor, Timestamp::MIN);
        let plan = self.source.plan(resume_from).await?;
        if plan.partitions.is_empty() {
            bail!(
                ErrorKind::SourceError,
                "Replication flow plan has no partitions"
            );
        }

        info!(
            partitions = plan.partitions.len(),
            %resume_from,
            "starting replication flow"
        );
        self.tracker
            .set_status(JobStatus::Running {
                purgatory_events: 0,
            })
            .await?;

        let (flow_shutdown_tx, _) = create_shutdown_channel();
        let (checkpoint_tx, mut checkpoint_rx) = mpsc::unbounded_channel();
        let pool = WriterWorkerPool::new();

        if let Err(err) = self
            .start_writers(&plan, resume_from, &pool, checkpoint_tx, &flow_shutdown_tx)
            .await
        {
            let _ = flow_shutdown_tx.shutdown();
            drain_pool(&pool).await;
            pool.discard_all().await;

            return Err(err);
        }

        let heartbeat = HeartbeatWorker::new(
            self.config.stream_id.clone(),
            self.producer.clone(),
            self.settings.clone(),
            self.tracker.subscribe(),
            flow_shutdown_tx.subscribe(),
        )
        .start()
        .await?;
        let replanner = ReplannerWorker::new(
            &plan,
            self.topology.clone(),
            self.settings.clone(),
            flow_shutdown_tx.subscribe(),
        )
        .start()
        .await?;

        let mut frontier = FlowFrontier::new(plan.partitions.iter().map(|p| p.id), resume_from);
        let checkpoint_period = Duration::from_millis(self.config.checkpoint.frequency_ms);
        let mut checkpoint_interval =
            interval_at(Instant::now() + checkpoint_period, checkpoint_period);
        checkpoint_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown_rx = self.shutdown_rx.clone();
        let heartbeat_wait = heartbeat.wait();
        let replanner_wait = replanner.wait();
        tokio::pin!(heartbeat_wait);
        tokio::pin!(replanner_wait);
        let mut heartbeat_done = false;
        let mut replanner_done = false;

        let outcome = {
            let writers_wait = pool.wait_all();
            tokio::pin!(writers_wait);

            loop {
                tokio::select! {
                    biased;

                    _ = wait_for_shutdown(&mut shutdown_rx) => break Ok(()),

                    result = &mut writers_wait => {
                        break match result {
                            Ok(()) => Err(ldr_error!(
                                ErrorKind::SourceError,
                                "All writers of the flow stopped"
                            )),
                            Err(err) => Err(err),
                        };
                    }

                    result = &mut heartbeat_wait, if !heartbeat_done => {
                        heartbeat_done = true;
                        if let Err(err) = result {
                            break Err(err);
                        }
                    }

                    result = &mut replanner_wait, if !replanner_done => {
                        replanner_done = true;
                        if let Err(err) = result {
                            break Err(err);
                        }
                    }

                    Some((partition_id, ts)) = checkpoint_rx.recv() => {
                        frontier.update(partition_id, ts);
                    }

                    _ = checkpoint_interval.tick() => {
                        if let Err(err) = self.persist_progress(&frontier, resume_from).await {
                            break Err(err);
                        }
                    }
                }
            }
        };

        info!("stopping replication flow");
        let _ = flow_shutdown_tx.shutdown();

        drain_pool(&pool).await;
        if !heartbeat_done && let Err(err) = heartbeat_wait.await {
            warn!(error = %err, "heartbeat worker failed while stopping");
        }
        if !replanner_done && let Err(err) = replanner_wait.await {
            warn!(error = %err, "replanner worker failed while stopping");
        }

        while let Ok((partition_id, ts)) = checkpoint_rx.try_recv() {
            frontier.update(partition_id, ts);
        }
        if let Err(err) = self.advance(&frontier, resume_from).await {
            warn!(error = %err, "failed to persist the final replicated time of the flow");
        }

        // Released checkpoints never cover events still in purgatory, the next flow receives them
        // again.
        pool.discard_all().await;

        outcome
    }

    async fn start_writers(
        &self,
        plan: &FlowPlan,
        resume_from: Timestamp,
        pool: &WriterWorkerPool,
        checkpoint_tx: mpsc::UnboundedSender<ReleasedCheckpoint>,
        flow_shutdown_tx: &ShutdownTx,
    ) -> LdrResult<()> {
        let mut workers = pool.lock().await;
        for partition in &plan.partitions {
            let worker = WriterWorker::new(
                self.config.id,
                self.config.clone(),
                partition.clone(),
                resume_from,
                self.source.clone(),
                self.handler.clone(),
                self.dlq.clone(),
                self.settings.clone(),
                self.metrics.clone(),
                pool.clone(),
                checkpoint_tx.clone(),
                flow_shutdown_tx.subscribe(),
            );

            if !workers.start_worker(worker).await? {
                bail!(
                    ErrorKind::SourceError,
                    "Replication flow plan assigns a partition twice",
                    format!("partition {}", partition.id)
                );
            }
        }

        Ok(())
    }

    async fn advance(&self, frontier: &FlowFrontier, resume_from: Timestamp) -> LdrResult<()> {
        if let Some(min) = frontier.min()
            && min > resume_from
        {
            self.tracker.advance(min).await?;
        }

        Ok(())
    }

    async fn persist_progress(
        &self,
        frontier: &FlowFrontier,
        resume_from: Timestamp,
    ) -> LdrResult<()> {
        self.advance(frontier, resume_from).await?;

        let purgatory_events = self.metrics.purgatory_events().max(0) as u64;
        self.tracker
            .set_status(JobStatus::Running { purgatory_events })
            .await
    }
}

/// Waits for every writer of `pool` to stop, logging their failures.
async fn drain_pool(pool: &WriterWorkerPool) {
    while let Err(err) = pool.wait_all().await {
        warn!(error = %err, "writer failed while stopping the flow");
    }
}

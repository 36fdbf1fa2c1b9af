use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::checkpoint::{JobProgress, JobStatus, ProgressStore};
use crate::error::LdrResult;
use crate::types::{JobId, Timestamp};

/// Monotonic replicated time of a job, persisted on every advance.
#[derive(Debug, Clone)]
pub struct ReplicatedTimeTracker<P> {
    job_id: JobId,
    store: P,
    progress: Arc<Mutex<JobProgress>>,
    replicated_time_tx: Arc<watch::Sender<Option<Timestamp>>>,
}

impl<P> ReplicatedTimeTracker<P>
where
    P: ProgressStore,
{
    /// Loads the persisted progress of `job_id`, if any.
    pub async fn load(job_id: JobId, store: P) -> LdrResult<Self> {
        let progress = store.load(job_id).await?.unwrap_or_default();
        if let Some(replicated_time) = progress.replicated_time {
            info!(job_id, %replicated_time, "resuming from persisted replicated time");
        }

        let (replicated_time_tx, _) = watch::channel(progress.replicated_time);

        Ok(Self {
            job_id,
            store,
            progress: Arc::new(Mutex::new(progress)),
            replicated_time_tx: Arc::new(replicated_time_tx),
        })
    }

    pub fn current(&self) -> Option<Timestamp> {
        *self.replicated_time_tx.borrow()
    }

    /// Whether every source change at or before `ts` has been replicated.
    pub fn has_replicated(&self, ts: Timestamp) -> bool {
        self.current().is_some_and(|current| current >= ts)
    }

    /// Where a flow resumes: the persisted replicated time, else the cursor, else `start`.
    pub fn resume_timestamp(&self, cursor: Option<Timestamp>, start: Timestamp) -> Timestamp {
        self.current().or(cursor).unwrap_or(start)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Timestamp>> {
        self.replicated_time_tx.subscribe()
    }

    pub async fn status(&self) -> JobStatus {
        self.progress.lock().await.status.clone()
    }

    /// Moves the replicated time to `ts` and persists it.
    ///
    /// Returns `false` without writing anything if `ts` is not strictly greater than the current
    /// replicated time.
    pub async fn advance(&self, ts: Timestamp) -> LdrResult<bool> {
        let mut progress = self.progress.lock().await;
        if progress.replicated_time.is_some_and(|current| current >= ts) {
            return Ok(false);
        }

        let mut updated = progress.clone();
        updated.replicated_time = Some(ts);
        self.store.store(self.job_id, updated.clone()).await?;
        *progress = updated;

        self.replicated_time_tx.send_replace(Some(ts));
        debug!(job_id = self.job_id, replicated_time = %ts, "advanced replicated time");

        Ok(true)
    }

    /// Persists a new job status, skipping the write if it is unchanged.
    pub async fn set_status(&self, status: JobStatus) -> LdrResult<()> {
        let mut progress = self.progress.lock().await;
        if progress.status == status {
            return Ok(());
        }

        let mut updated = progress.clone();
        updated.status = status;
        self.store.store(self.job_id, updated.clone()).await?;
        info!(job_id = self.job_id, status = %updated.status, "job status changed");
        *progress = updated;

        Ok(())
    }
}

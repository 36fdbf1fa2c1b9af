use std::collections::HashMap;
use std::mem;
use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::dlq::DeadLetterQueue;
use crate::error::LdrResult;
use crate::handler::BatchHandler;
use crate::source::{ChangeSource, PartitionId};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::writer::{WriterWorker, WriterWorkerHandle, WriterWorkerState};

/// Internal state for [`WriterWorkerPool`].
#[derive(Debug)]
pub struct WriterWorkerPoolInner {
    /// Currently running writers indexed by partition.
    active: HashMap<PartitionId, WriterWorkerHandle>,
    /// Writers that completed, successfully or not, and were not awaited yet.
    finished: Vec<WriterWorkerHandle>,
    /// States of every writer started in this pool, kept after the writers finish.
    states: HashMap<PartitionId, WriterWorkerState>,
    /// Notification mechanism for pool state changes.
    pool_update: Arc<Notify>,
}

impl WriterWorkerPoolInner {
    fn new() -> Self {
        Self {
            active: HashMap::new(),
            finished: Vec::new(),
            states: HashMap::new(),
            pool_update: Arc::new(Notify::new()),
        }
    }

    /// Starts a writer and adds it to the pool.
    ///
    /// Returns `Ok(false)` without starting it if a writer for the same partition is active.
    pub async fn start_worker<S, H, Q>(&mut self, worker: WriterWorker<S, H, Q>) -> LdrResult<bool>
    where
        S: ChangeSource + Send + Sync + 'static,
        H: BatchHandler + Send + Sync + 'static,
        Q: DeadLetterQueue + Send + Sync + 'static,
    {
        let partition_id = worker.partition_id();
        if self.active.contains_key(&partition_id) {
            warn!(partition_id, "writer for the partition already exists in the pool");
            return Ok(false);
        }

        // The pool stays locked until the handle is inserted, so the writer cannot mark itself
        // finished before being added.
        let handle = worker.start().await?;
        self.states.insert(partition_id, handle.state());
        self.active.insert(partition_id, handle);
        debug!(partition_id, "added writer to the pool");

        Ok(true)
    }

    /// Moves a writer from the active to the finished set and wakes up waiters.
    pub fn mark_worker_finished(&mut self, partition_id: PartitionId) {
        if let Some(handle) = self.active.remove(&partition_id) {
            self.finished.push(handle);
        }

        self.pool_update.notify_waiters();
    }

    pub fn get_worker_state(&self, partition_id: PartitionId) -> Option<WriterWorkerState> {
        self.states.get(&partition_id).cloned()
    }

    pub fn worker_states(&self) -> Vec<WriterWorkerState> {
        self.states.values().cloned().collect()
    }

    /// Collects the results of finished writers.
    ///
    /// Returns an error as soon as a finished writer failed, `Ok(Some(notify))` while writers are
    /// still active and `Ok(None)` once every writer completed successfully.
    pub async fn wait_all(&mut self) -> LdrResult<Option<Arc<Notify>>> {
        let mut errors = Vec::new();
        for worker in mem::take(&mut self.finished) {
            if let Err(err) = worker.wait().await {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        // Waiting on active writers here would deadlock, since they lock the pool to mark
        // themselves as finished.
        if !self.active.is_empty() {
            return Ok(Some(self.pool_update.clone()));
        }

        Ok(None)
    }
}

/// Pool of the writer workers of a flow.
#[derive(Debug, Clone)]
pub struct WriterWorkerPool {
    inner: Arc<Mutex<WriterWorkerPoolInner>>,
}

impl WriterWorkerPool {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(WriterWorkerPoolInner::new())),
        }
    }

    /// Waits until every writer completed successfully or one of them failed.
    pub async fn wait_all(&self) -> LdrResult<()> {
        loop {
            // The notification is registered before releasing the lock, so a writer finishing in
            // between is not missed.
            let notify = {
                let mut workers = self.inner.lock().await;
                let Some(notify) = workers.wait_all().await? else {
                    return Ok(());
                };

                notify
            };
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut workers = self.inner.lock().await;
                if !workers.finished.is_empty() || workers.active.is_empty() {
                    continue;
                }
            }

            notified.await;
        }
    }

    /// Total number of events buffered in the purgatories of the pool's writers.
    pub async fn purgatory_events(&self) -> u64 {
        let states = self.inner.lock().await.worker_states();

        let mut events = 0;
        for state in states {
            events += state.purgatory().lock().await.len();
        }

        events
    }

    /// Drops the contents of every writer's purgatory.
    pub async fn discard_all(&self) {
        let states = self.inner.lock().await.worker_states();
        for state in states {
            state.purgatory().lock().await.discard();
        }
    }
}

impl Default for WriterWorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for WriterWorkerPool {
    type Target = Mutex<WriterWorkerPoolInner>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

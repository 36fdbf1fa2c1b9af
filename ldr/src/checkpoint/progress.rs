use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, LdrResult};
use crate::ldr_error;
use crate::types::{JobId, Timestamp};

/// Externally visible status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Replicating, with `purgatory_events` events waiting to be retried.
    Running { purgatory_events: u64 },
    /// The flow stopped with a retryable error and is being rebuilt.
    Restarting { reason: String },
    Failed { reason: String },
    Canceled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running { purgatory_events: 0 } => f.write_str("running"),
            JobStatus::Running { purgatory_events } => {
                write!(f, "running, {purgatory_events} events in purgatory")
            }
            JobStatus::Restarting { reason } => write!(f, "restarting: {reason}"),
            JobStatus::Failed { reason } => write!(f, "failed: {reason}"),
            JobStatus::Canceled => f.write_str("canceled"),
        }
    }
}

/// Persisted progress of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Every source change at or before this time has been applied or dead-lettered.
    pub replicated_time: Option<Timestamp>,
    pub status: JobStatus,
}

impl Default for JobProgress {
    fn default() -> Self {
        Self {
            replicated_time: None,
            status: JobStatus::Running {
                purgatory_events: 0,
            },
        }
    }
}

/// Durable storage of [`JobProgress`] records.
pub trait ProgressStore {
    fn load(&self, job_id: JobId) -> impl Future<Output = LdrResult<Option<JobProgress>>> + Send;

    fn store(
        &self,
        job_id: JobId,
        progress: JobProgress,
    ) -> impl Future<Output = LdrResult<()>> + Send;
}

#[derive(Debug, Default)]
struct Inner {
    progress: HashMap<JobId, JobProgress>,
    fail_writes: bool,
}

/// In-memory [`ProgressStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryProgressStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, job_id: JobId) -> Option<JobProgress> {
        self.inner.lock().await.progress.get(&job_id).cloned()
    }

    /// Makes every following write fail with [`ErrorKind::ProgressStoreError`].
    pub async fn fail_writes(&self, fail: bool) {
        self.inner.lock().await.fail_writes = fail;
    }
}

impl ProgressStore for MemoryProgressStore {
    async fn load(&self, job_id: JobId) -> LdrResult<Option<JobProgress>> {
        Ok(self.get(job_id).await)
    }

    async fn store(&self, job_id: JobId, progress: JobProgress) -> LdrResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.fail_writes {
            bail!(
                ErrorKind::ProgressStoreError,
                "Progress store rejected the write"
            );
        }

        inner.progress.insert(job_id, progress);

        Ok(())
    }
}

/// [`ProgressStore`] keeping one JSON file per job in a directory.
#[derive(Debug, Clone)]
pub struct FileProgressStore {
    dir: PathBuf,
}

impl FileProgressStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("job-{job_id}.json"))
    }
}

impl ProgressStore for FileProgressStore {
    async fn load(&self, job_id: JobId) -> LdrResult<Option<JobProgress>> {
        let path = self.path(job_id);
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                bail!(
                    ErrorKind::ProgressStoreError,
                    "Failed to read job progress",
                    format!("{}: {err}", path.display())
                );
            }
        };

        let progress = serde_json::from_slice(&content)?;
        debug!(job_id, path = %path.display(), "loaded job progress");

        Ok(Some(progress))
    }

    async fn store(&self, job_id: JobId, progress: JobProgress) -> LdrResult<()> {
        let content = serde_json::to_vec_pretty(&progress)?;
        let path = self.path(job_id);
        let tmp_path = path.with_extension("json.tmp");

        let write = async {
            fs::create_dir_all(&self.dir).await?;
            fs::write(&tmp_path, &content).await?;
            fs::rename(&tmp_path, &path).await
        };
        write.await.map_err(|err| {
            ldr_error!(
                ErrorKind::ProgressStoreError,
                "Failed to write job progress",
                format!("{}: {err}", path.display())
            )
        })
    }
}

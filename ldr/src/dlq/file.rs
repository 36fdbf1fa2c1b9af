use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::dlq::{DeadLetterQueue, DeadLetterRecord};
use crate::error::{ErrorKind, LdrError, LdrResult, RetryEligibility};
use crate::ldr_error;
use crate::types::{ChangeEvent, DecodedRow, JobId};

const DEAD_LETTERS_FILE_NAME: &str = "dead_letters.jsonl";

/// [`DeadLetterQueue`] appending JSON lines to a file in a directory.
#[derive(Debug, Clone)]
pub struct FileDeadLetterQueue {
    dir: PathBuf,
}

impl FileDeadLetterQueue {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn file_path(&self) -> PathBuf {
        self.dir.join(DEAD_LETTERS_FILE_NAME)
    }

    /// Reads back every record written so far.
    pub async fn read_records(&self) -> LdrResult<Vec<DeadLetterRecord>> {
        let content = match fs::read_to_string(self.file_path()).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(LdrError::from))
            .collect()
    }

    async fn append(path: &Path, line: &[u8]) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line).await?;
        file.flush().await
    }
}

impl DeadLetterQueue for FileDeadLetterQueue {
    async fn create(&self) -> LdrResult<()> {
        fs::create_dir_all(&self.dir).await.map_err(|err| {
            ldr_error!(
                ErrorKind::DeadLetterQueueWriteFailed,
                "Failed to create the dead letter queue directory",
                format!("{}: {err}", self.dir.display())
            )
        })?;

        info!(path = %self.file_path().display(), "dead letter queue is ready");

        Ok(())
    }

    async fn log(
        &self,
        job_id: JobId,
        event: &ChangeEvent,
        row: Option<&DecodedRow>,
        reason: &LdrError,
        eligibility: RetryEligibility,
    ) -> LdrResult<()> {
        let record = DeadLetterRecord::new(job_id, event, row, reason, eligibility);
        let mut line = serde_json::to_vec(&record).map_err(|err| {
            ldr_error!(
                ErrorKind::DeadLetterQueueWriteFailed,
                "Failed to serialize a dead letter",
                err
            )
        })?;
        line.push(b'\n');

        let path = self.file_path();
        if let Err(err) = Self::append(&path, &line).await {
            warn!(path = %path.display(), error = %err, "failed to write a dead letter");

            return Err(ldr_error!(
                ErrorKind::DeadLetterQueueWriteFailed,
                "Failed to write to the dead letter queue",
                format!("{}: {err}", path.display())
            ));
        }

        Ok(())
    }
}

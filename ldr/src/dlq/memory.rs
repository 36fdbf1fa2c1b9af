use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::dlq::{DeadLetterQueue, DeadLetterRecord};
use crate::error::{ErrorKind, LdrError, LdrResult, RetryEligibility};
use crate::types::{ChangeEvent, DecodedRow, JobId};

#[derive(Debug, Default)]
struct Inner {
    records: Vec<DeadLetterRecord>,
    fail_writes: bool,
}

/// In-memory [`DeadLetterQueue`] that can be inspected and made to fail.
#[derive(Debug, Clone, Default)]
pub struct MemoryDeadLetterQueue {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<DeadLetterRecord> {
        self.inner.lock().await.records.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Makes every following write fail.
    pub async fn fail_writes(&self, fail: bool) {
        self.inner.lock().await.fail_writes = fail;
    }
}

impl DeadLetterQueue for MemoryDeadLetterQueue {
    async fn create(&self) -> LdrResult<()> {
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
        let mut inner = self.inner.lock().await;
        if inner.fail_writes {
            bail!(
                ErrorKind::DeadLetterQueueWriteFailed,
                "Dead letter queue rejected the write"
            );
        }

        info!(job_id, error_kind = ?reason.kind(), "recording a dead letter");
        inner
            .records
            .push(DeadLetterRecord::new(job_id, event, row, reason, eligibility));

        Ok(())
    }
}

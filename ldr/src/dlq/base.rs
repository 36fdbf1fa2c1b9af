use std::future::Future;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use ldr_config::shared::DeadLetterQueueConfig;
use serde::{Deserialize, Serialize};

use crate::dlq::{FileDeadLetterQueue, MemoryDeadLetterQueue};
use crate::error::{ErrorKind, LdrError, LdrResult, RetryEligibility};
use crate::types::{ChangeEvent, DecodedRow, JobId};

/// A change event that was given up on, with the reason it could not be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub job_id: JobId,
    pub recorded_at: DateTime<Utc>,
    pub event: ChangeEvent,
    /// The decoded row, when the event could be decoded.
    pub row: Option<DecodedRow>,
    pub error_kind: ErrorKind,
    pub reason: String,
    pub eligibility: RetryEligibility,
}

impl DeadLetterRecord {
    pub fn new(
        job_id: JobId,
        event: &ChangeEvent,
        row: Option<&DecodedRow>,
        reason: &LdrError,
        eligibility: RetryEligibility,
    ) -> Self {
        Self {
            job_id,
            recorded_at: Utc::now(),
            event: event.clone(),
            row: row.cloned(),
            error_kind: reason.kind(),
            reason: reason.to_string(),
            eligibility,
        }
    }
}

/// Durable sink for events that cannot be applied.
///
/// A failing [`DeadLetterQueue::log`] must be treated as fatal by the caller, since the event
/// would otherwise be lost.
pub trait DeadLetterQueue {
    /// Prepares the queue. Calling it more than once has no further effect.
    fn create(&self) -> impl Future<Output = LdrResult<()>> + Send;

    fn log(
        &self,
        job_id: JobId,
        event: &ChangeEvent,
        row: Option<&DecodedRow>,
        reason: &LdrError,
        eligibility: RetryEligibility,
    ) -> impl Future<Output = LdrResult<()>> + Send;
}

/// The dead letter queue selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredDeadLetterQueue {
    Memory(MemoryDeadLetterQueue),
    File(FileDeadLetterQueue),
}

impl ConfiguredDeadLetterQueue {
    pub fn from_config(config: &DeadLetterQueueConfig) -> Self {
        match config {
            DeadLetterQueueConfig::Memory => Self::Memory(MemoryDeadLetterQueue::new()),
            DeadLetterQueueConfig::File { path } => {
                Self::File(FileDeadLetterQueue::new(PathBuf::from(path)))
            }
        }
    }
}

impl DeadLetterQueue for ConfiguredDeadLetterQueue {
    async fn create(&self) -> LdrResult<()> {
        match self {
            Self::Memory(dlq) => dlq.create().await,
            Self::File(dlq) => dlq.create().await,
        }
    }

    async fn log(
        &self,
        job_id: JobId,
        event: &ChangeEvent,
        row: Option<&DecodedRow>,
        reason: &LdrError,
        eligibility: RetryEligibility,
    ) -> LdrResult<()> {
        match self {
            Self::Memory(dlq) => dlq.log(job_id, event, row, reason, eligibility).await,
            Self::File(dlq) => dlq.log(job_id, event, row, reason, eligibility).await,
        }
    }
}

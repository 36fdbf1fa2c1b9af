//! Bounded retry buffer for change events that failed to apply.
//!
//! Events are kept in levels, one per interval between two resolved checkpoints of the source. A
//! checkpoint received while events are buffered is held on the newest level and only released
//! once that level and every older level have been emptied, by applying their events or by
//! recording them in the dead letter queue.

use std::collections::VecDeque;
use std::slice;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dlq::DeadLetterQueue;
use crate::error::{ErrorKind, LdrError, LdrResult, RetryEligibility};
use crate::handler::BatchHandler;
use crate::ldr_error;
use crate::metrics::IngestionMetrics;
use crate::types::{ChangeEvent, JobId, Timestamp};

/// A buffered event waiting to be retried.
#[derive(Debug, Clone)]
pub struct PurgatoryEntry {
    pub event: ChangeEvent,
    pub last_error: LdrError,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Level {
    entries: Vec<PurgatoryEntry>,
    /// Checkpoint released once this level and all older ones are empty, `None` while the level
    /// still accepts events.
    closed_at: Option<Timestamp>,
}

#[derive(Debug)]
pub struct Purgatory {
    job_id: JobId,
    levels: VecDeque<Level>,
    bytes: u64,
    events: u64,
    byte_limit: u64,
    metrics: IngestionMetrics,
}

impl Purgatory {
    pub fn new(job_id: JobId, byte_limit: u64, metrics: IngestionMetrics) -> Self {
        Self {
            job_id,
            levels: VecDeque::new(),
            bytes: 0,
            events: 0,
            byte_limit,
            metrics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events == 0
    }

    pub fn len(&self) -> u64 {
        self.events
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn byte_limit(&self) -> u64 {
        self.byte_limit
    }

    /// Changes the byte limit. A lower limit is enforced on the next [`Purgatory::store`].
    pub fn set_byte_limit(&mut self, byte_limit: u64) {
        if byte_limit != self.byte_limit {
            info!(old = self.byte_limit, new = byte_limit, "purgatory byte limit changed");
            self.byte_limit = byte_limit;
        }
    }

    pub fn full(&self) -> bool {
        self.bytes >= self.byte_limit
    }

    /// Buffered entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &PurgatoryEntry> {
        self.levels.iter().flat_map(|level| level.entries.iter())
    }

    /// Buffers events that failed with `reason`.
    ///
    /// Events failing with a non retryable error are recorded in the dead letter queue directly.
    /// An event is appended as long as the buffer is not [`Purgatory::full`]. Once it is full, the
    /// buffered events are retried and the oldest ones are dead-lettered until there is room again,
    /// so the buffer never exceeds its limit by more than the newest event.
    ///
    /// Returns the newest checkpoint released while making room.
    pub async fn store<H, Q>(
        &mut self,
        events: Vec<ChangeEvent>,
        reason: LdrError,
        handler: &H,
        dlq: &Q,
    ) -> LdrResult<Option<Timestamp>>
    where
        H: BatchHandler,
        Q: DeadLetterQueue,
    {
        if reason.retry_eligibility() == RetryEligibility::NotRetryable {
            for event in &events {
                self.dead_letter(event, &reason, handler, dlq).await?;
            }

            return Ok(None);
        }

        let mut released = None;
        let mut drained = false;
        for event in events {
            if self.full() && !drained {
                drained = true;
                released = self.drain(handler, dlq).await?.or(released);
            }

            while self.full() {
                let Some(oldest) = self.pop_oldest() else {
                    break;
                };
                warn!(
                    retry_count = oldest.retry_count,
                    byte_limit = self.byte_limit,
                    "purgatory is full, evicting the oldest entry"
                );
                self.dead_letter(&oldest.event, &oldest.last_error, handler, dlq)
                    .await?;
            }

            self.push(PurgatoryEntry {
                event,
                last_error: reason.clone(),
                retry_count: 0,
                enqueued_at: Utc::now(),
            });
        }

        Ok(self.release().or(released))
    }

    /// Retries every buffered event once.
    ///
    /// Applied events are removed, events failing with a non retryable error are dead-lettered and
    /// the others stay buffered with their new error. Returns the newest checkpoint released.
    pub async fn drain<H, Q>(&mut self, handler: &H, dlq: &Q) -> LdrResult<Option<Timestamp>>
    where
        H: BatchHandler,
        Q: DeadLetterQueue,
    {
        if self.is_empty() {
            return Ok(None);
        }

        let mut applied = 0;
        for index in 0..self.levels.len() {
            let entries = std::mem::take(&mut self.levels[index].entries);
            let mut kept = Vec::with_capacity(entries.len());

            for mut entry in entries {
                match handler.handle_batch(slice::from_ref(&entry.event)).await {
                    Ok(stats) => {
                        self.metrics.record_batch(&stats);
                        self.account_removal(&entry);
                        applied += 1;
                    }
                    Err(err) if err.retry_eligibility() == RetryEligibility::NotRetryable => {
                        self.account_removal(&entry);
                        self.dead_letter(&entry.event, &err, handler, dlq).await?;
                    }
                    Err(err) => {
                        entry.retry_count += 1;
                        entry.last_error = err;
                        kept.push(entry);
                    }
                }
            }

            self.levels[index].entries = kept;
        }

        debug!(applied, remaining = self.events, "drained purgatory");

        Ok(self.release())
    }

    /// Records a resolved checkpoint of the source.
    ///
    /// Returns `ts` if it can be released right away, `None` if it is held until the buffered
    /// events are resolved.
    pub fn checkpoint(&mut self, ts: Timestamp) -> Option<Timestamp> {
        if self.is_empty() {
            self.levels.clear();
            return Some(ts);
        }

        let len = self.levels.len();
        match self.levels.back().map(|level| level.entries.is_empty()) {
            None => return Some(ts),
            // Nothing arrived since the previous checkpoint, which is superseded.
            Some(true) if len >= 2 => self.levels[len - 2].closed_at = Some(ts),
            Some(_) => {
                self.levels[len - 1].closed_at = Some(ts);
                self.levels.push_back(Level::default());
            }
        }

        None
    }

    /// Drops every buffered event and held checkpoint.
    pub fn discard(&mut self) {
        if !self.is_empty() {
            info!(events = self.events, bytes = self.bytes, "discarding purgatory");
        }

        self.metrics
            .adjust_purgatory(-(self.bytes as i64), -(self.events as i64));
        self.levels.clear();
        self.bytes = 0;
        self.events = 0;
    }

    fn push(&mut self, entry: PurgatoryEntry) {
        let size = entry.event.byte_size();

        match self.levels.back_mut() {
            Some(level) if level.closed_at.is_none() => level.entries.push(entry),
            _ => self.levels.push_back(Level {
                entries: vec![entry],
                closed_at: None,
            }),
        }

        self.bytes += size;
        self.events += 1;
        self.metrics.adjust_purgatory(size as i64, 1);
    }

    fn pop_oldest(&mut self) -> Option<PurgatoryEntry> {
        let level = self
            .levels
            .iter_mut()
            .find(|level| !level.entries.is_empty())?;
        let entry = level.entries.remove(0);
        self.account_removal(&entry);

        Some(entry)
    }

    fn account_removal(&mut self, entry: &PurgatoryEntry) {
        let size = entry.event.byte_size();
        self.bytes -= size;
        self.events -= 1;
        self.metrics.adjust_purgatory(-(size as i64), -1);
    }

    /// Pops the emptied closed levels at the front, returning the newest released checkpoint.
    fn release(&mut self) -> Option<Timestamp> {
        let mut released = None;
        while let Some(front) = self.levels.front() {
            match front.closed_at {
                Some(ts) if front.entries.is_empty() => {
                    released = Some(ts);
                    self.levels.pop_front();
                }
                _ => break,
            }
        }

        released
    }

    async fn dead_letter<H, Q>(
        &self,
        event: &ChangeEvent,
        reason: &LdrError,
        handler: &H,
        dlq: &Q,
    ) -> LdrResult<()>
    where
        H: BatchHandler,
        Q: DeadLetterQueue,
    {
        let row = handler.decode_row(event);
        dlq.log(
            self.job_id,
            event,
            row.as_ref(),
            reason,
            reason.retry_eligibility(),
        )
        .await
        .map_err(|err| {
            if err.kind() == ErrorKind::DeadLetterQueueWriteFailed {
                err
            } else {
                ldr_error!(
                    ErrorKind::DeadLetterQueueWriteFailed,
                    "Failed to record a dead letter",
                    err
                )
            }
        })?;

        self.metrics.record_dead_letter();

        Ok(())
    }
}

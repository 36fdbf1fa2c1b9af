//! Turns a change event into an idempotent write against the local key-value store.

use std::sync::Arc;

use ldr_config::shared::ApplyConfig;
use tracing::{debug, trace};

use crate::error::{ErrorKind, LdrResult};
use crate::kv::{KvTxn, KvValue, TxnWriteLog, VersionedValue, WriteKind};
use crate::ldr_error;
use crate::resolver::{ConflictResolver, Decision};
use crate::schema::RowDecoder;
use crate::types::{BatchStats, ChangeEvent};

/// How an event without a previous image is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertStrategy {
    /// Assume the row is new and write it with a conditional put expecting no value, falling back
    /// to conflict resolution only if the row exists.
    ///
    /// An update without a previous image therefore costs one extra conditional put.
    Optimistic,
    /// Always read the local row before deciding how to write.
    ReadFirst,
}

impl From<&ApplyConfig> for InsertStrategy {
    fn from(config: &ApplyConfig) -> Self {
        if config.optimistic_insert {
            InsertStrategy::Optimistic
        } else {
            InsertStrategy::ReadFirst
        }
    }
}

/// What happened to a single applied event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Written after reading the local row.
    Applied,
    /// Written by an optimistic insert without reading the local row.
    Inserted,
    /// Lost conflict resolution, nothing was written.
    Ignored,
}

impl RowOutcome {
    /// Adds this outcome of `event` to `stats`. Write counts are tracked by the write log instead.
    pub fn record(self, event: &ChangeEvent, stats: &mut BatchStats) {
        match self {
            RowOutcome::Applied => {
                stats.rows_applied += 1;
                stats.bytes_applied += event.byte_size();
            }
            RowOutcome::Inserted => {
                stats.rows_applied += 1;
                stats.optimistic_inserts += 1;
                stats.bytes_applied += event.byte_size();
            }
            RowOutcome::Ignored => stats.rows_ignored += 1,
        }
    }
}

/// Applies change events inside a caller provided transaction.
#[derive(Debug, Clone)]
pub struct RowApplier<R> {
    resolver: R,
    decoder: Arc<RowDecoder>,
    strategy: InsertStrategy,
    max_condition_retries: u32,
}

impl<R> RowApplier<R>
where
    R: ConflictResolver + Sync,
{
    pub fn new(resolver: R, decoder: Arc<RowDecoder>, config: &ApplyConfig) -> Self {
        Self {
            resolver,
            decoder,
            strategy: InsertStrategy::from(config),
            max_condition_retries: config.max_condition_retries,
        }
    }

    pub fn strategy(&self) -> InsertStrategy {
        self.strategy
    }

    pub fn decoder(&self) -> &Arc<RowDecoder> {
        &self.decoder
    }

    /// Applies `event` in `txn`, recording every write request in `write_log`.
    ///
    /// Fails with [`ErrorKind::SchemaMismatch`] if the event does not match its table, and with a
    /// retryable [`ErrorKind::ConditionFailed`] if the local row keeps changing under conflict
    /// resolution.
    pub async fn apply<T>(
        &self,
        txn: &mut T,
        event: &ChangeEvent,
        write_log: &mut TxnWriteLog,
    ) -> LdrResult<RowOutcome>
    where
        T: KvTxn + Send,
    {
        self.decoder.decode(event)?;

        let value = KvValue {
            row: event.value.clone(),
            origin_timestamp: Some(event.proposed_timestamp()),
        };

        if self.strategy == InsertStrategy::Optimistic && event.prev_value.is_none() {
            write_log.record(WriteKind::CPut, &event.key);
            match txn.cput(event.key.clone(), value.clone(), None).await {
                Ok(()) => {
                    trace!(txn_id = %txn.id(), "optimistically inserted row");
                    return Ok(RowOutcome::Inserted);
                }
                Err(err) if err.kind() == ErrorKind::ConditionFailed => {
                    debug!(txn_id = %txn.id(), "optimistic insert found an existing row, resolving");
                }
                Err(err) => return Err(err),
            }
        }

        let mut attempts = 0;
        loop {
            match self.read_and_write(txn, event, &value, write_log).await {
                Err(err) if err.kind() == ErrorKind::ConditionFailed => {
                    if attempts >= self.max_condition_retries {
                        return Err(ldr_error!(
                            ErrorKind::ConditionFailed,
                            "Row kept changing during conflict resolution",
                            format!("gave up after {} attempts: {err}", attempts + 1)
                        ));
                    }

                    attempts += 1;
                    debug!(attempts, "conditional write failed, resolving again");
                }
                result => return result,
            }
        }
    }

    async fn read_and_write<T>(
        &self,
        txn: &mut T,
        event: &ChangeEvent,
        value: &KvValue,
        write_log: &mut TxnWriteLog,
    ) -> LdrResult<RowOutcome>
    where
        T: KvTxn + Send,
    {
        let Some(existing) = txn.get(&event.key).await? else {
            write_log.record(WriteKind::CPut, &event.key);
            txn.cput(event.key.clone(), value.clone(), None).await?;

            return Ok(RowOutcome::Applied);
        };

        if matches_previous_image(event, &existing) {
            write_log.record(WriteKind::Put, &event.key);
            txn.put(event.key.clone(), value.clone()).await?;

            return Ok(RowOutcome::Applied);
        }

        match self.resolver.resolve(event, &existing).await? {
            Decision::AcceptProposed => {
                write_log.record(WriteKind::Put, &event.key);
                txn.put(event.key.clone(), value.clone()).await?;

                Ok(RowOutcome::Applied)
            }
            Decision::IgnoreProposed => {
                trace!(txn_id = %txn.id(), "change lost conflict resolution");

                Ok(RowOutcome::Ignored)
            }
        }
    }
}

/// Whether the local row is exactly what the source saw before the change.
fn matches_previous_image(event: &ChangeEvent, existing: &VersionedValue) -> bool {
    match (&event.prev_value, &existing.value.row) {
        (Some(prev), Some(row)) => prev.value.as_ref() == Some(row),
        _ => false,
    }
}

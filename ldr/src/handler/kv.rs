use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, warn};

use crate::applier::RowApplier;
use crate::bail;
use crate::error::{ErrorKind, LdrResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{BATCH_HANDLER__BEFORE_COMMIT, ldr_fail_point};
use crate::handler::BatchHandler;
use crate::kv::{KvStore, KvTxn, TxnId, TxnWriteLog};
use crate::resolver::ConflictResolver;
use crate::types::{BatchStats, ChangeEvent, DecodedRow};

/// [`BatchHandler`] writing every batch in one transaction of a [`KvStore`].
///
/// Attempts failing with [`ErrorKind::TransactionRetry`] are retried with the same logical
/// transaction, so their write requests are counted once.
#[derive(Debug, Clone)]
pub struct KvBatchHandler<S, R> {
    store: S,
    applier: RowApplier<R>,
    max_txn_attempts: u32,
    synthetic_failure_percent: Arc<AtomicU8>,
}

impl<S, R> KvBatchHandler<S, R>
where
    S: KvStore + Sync,
    R: ConflictResolver + Sync,
{
    pub fn new(store: S, applier: RowApplier<R>, max_txn_attempts: u32) -> Self {
        Self {
            store,
            applier,
            max_txn_attempts: max_txn_attempts.max(1),
            synthetic_failure_percent: Arc::new(AtomicU8::new(0)),
        }
    }

    /// Makes `percent` percent of the batches fail with a retryable error before touching the
    /// store. Values above 100 are clamped.
    pub fn set_synthetic_failure_percent(&self, percent: u8) {
        self.synthetic_failure_percent
            .store(percent.min(100), Ordering::Relaxed);
    }

    fn inject_synthetic_failure(&self) -> LdrResult<()> {
        let percent = self.synthetic_failure_percent.load(Ordering::Relaxed);
        if percent > 0 && rand::random_range(0..100u8) < percent {
            bail!(
                ErrorKind::SyntheticFailure,
                "Injected synthetic failure",
                format!("{percent}% of batches are configured to fail")
            );
        }

        Ok(())
    }

    async fn attempt(
        &self,
        events: &[ChangeEvent],
        write_log: &mut TxnWriteLog,
    ) -> LdrResult<BatchStats> {
        let mut txn = self.store.begin(write_log.txn_id()).await?;

        let mut stats = BatchStats::default();
        for event in events {
            let outcome = self.applier.apply(&mut txn, event, write_log).await?;
            outcome.record(event, &mut stats);
        }

        #[cfg(feature = "failpoints")]
        ldr_fail_point(BATCH_HANDLER__BEFORE_COMMIT)?;

        txn.commit().await?;

        Ok(stats)
    }
}

impl<S, R> BatchHandler for KvBatchHandler<S, R>
where
    S: KvStore + Sync,
    R: ConflictResolver + Sync,
{
    async fn handle_batch(&self, events: &[ChangeEvent]) -> LdrResult<BatchStats> {
        self.inject_synthetic_failure()?;

        let mut write_log = TxnWriteLog::new(TxnId::new());
        let mut attempt = 1;
        loop {
            match self.attempt(events, &mut write_log).await {
                Ok(mut stats) => {
                    stats.conditional_puts = write_log.cputs();
                    stats.blind_puts = write_log.puts();

                    debug!(
                        txn_id = %write_log.txn_id(),
                        attempt,
                        rows_applied = stats.rows_applied,
                        rows_ignored = stats.rows_ignored,
                        "committed batch"
                    );

                    return Ok(stats);
                }
                Err(err)
                    if err.kind() == ErrorKind::TransactionRetry
                        && attempt < self.max_txn_attempts =>
                {
                    warn!(txn_id = %write_log.txn_id(), attempt, error = %err, "retrying batch transaction");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn decode_row(&self, event: &ChangeEvent) -> Option<DecodedRow> {
        self.applier.decoder().decode(event).ok()
    }
}

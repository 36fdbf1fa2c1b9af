use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::error::{LdrError, LdrResult};
use crate::handler::BatchHandler;
use crate::types::{BatchStats, ChangeEvent, DecodedRow};

type BatchCondition = Box<dyn Fn(&[ChangeEvent]) -> bool + Send + Sync>;

struct Inner {
    fail_all: Option<LdrError>,
    failing_keys: HashSet<Bytes>,
    key_error: Option<LdrError>,
    applied: Vec<ChangeEvent>,
    failed_batches: usize,
    conditions: Vec<(BatchCondition, Arc<Notify>)>,
}

impl Inner {
    fn check_conditions(&mut self) {
        let applied = &self.applied;
        self.conditions.retain(|(condition, notify)| {
            let should_retain = !condition(applied);
            if !should_retain {
                notify.notify_one();
            }
            should_retain
        });
    }

    fn failure(&self, events: &[ChangeEvent]) -> Option<LdrError> {
        if let Some(err) = &self.fail_all {
            return Some(err.clone());
        }

        let hits_failing_key = events
            .iter()
            .any(|event| self.failing_keys.contains(&event.key));
        if hits_failing_key {
            return self.key_error.clone();
        }

        None
    }
}

/// A test wrapper around a [`BatchHandler`] whose failures are controlled by the test.
///
/// Records every event of the batches the wrapped handler applied.
#[derive(Clone)]
pub struct ControllableBatchHandler<H> {
    handler: H,
    inner: Arc<Mutex<Inner>>,
}

impl<H: std::fmt::Debug> std::fmt::Debug for ControllableBatchHandler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllableBatchHandler")
            .field("handler", &self.handler)
            .finish()
    }
}

impl<H> ControllableBatchHandler<H> {
    pub fn wrap(handler: H) -> Self {
        Self {
            handler,
            inner: Arc::new(Mutex::new(Inner {
                fail_all: None,
                failing_keys: HashSet::new(),
                key_error: None,
                applied: Vec::new(),
                failed_batches: 0,
                conditions: Vec::new(),
            })),
        }
    }

    pub fn inner(&self) -> &H {
        &self.handler
    }

    /// Fails every batch with `err`, or stops failing with `None`.
    pub async fn fail_all(&self, err: Option<LdrError>) {
        self.inner.lock().await.fail_all = err;
    }

    /// Fails every batch containing one of `keys` with `err`.
    pub async fn fail_keys(&self, keys: impl IntoIterator<Item = Bytes>, err: LdrError) {
        let mut inner = self.inner.lock().await;
        inner.failing_keys = keys.into_iter().collect();
        inner.key_error = Some(err);
    }

    pub async fn clear_failures(&self) {
        let mut inner = self.inner.lock().await;
        inner.fail_all = None;
        inner.failing_keys.clear();
        inner.key_error = None;
    }

    pub async fn applied_events(&self) -> Vec<ChangeEvent> {
        self.inner.lock().await.applied.clone()
    }

    pub async fn failed_batches(&self) -> usize {
        self.inner.lock().await.failed_batches
    }

    /// Returns a notification fired once the applied events satisfy `condition`.
    pub async fn notify_on_applied<F>(&self, condition: F) -> Arc<Notify>
    where
        F: Fn(&[ChangeEvent]) -> bool + Send + Sync + 'static,
    {
        let notify = Arc::new(Notify::new());
        let mut inner = self.inner.lock().await;
        inner.conditions.push((Box::new(condition), notify.clone()));
        inner.check_conditions();

        notify
    }

    /// Returns a notification fired once `count` events were applied.
    pub async fn wait_for_applied(&self, count: usize) -> Arc<Notify> {
        self.notify_on_applied(move |events| events.len() >= count)
            .await
    }
}

impl<H> BatchHandler for ControllableBatchHandler<H>
where
    H: BatchHandler + Send + Sync,
{
    async fn handle_batch(&self, events: &[ChangeEvent]) -> LdrResult<BatchStats> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(err) = inner.failure(events) {
                inner.failed_batches += 1;
                return Err(err);
            }
        }

        let stats = self.handler.handle_batch(events).await?;

        let mut inner = self.inner.lock().await;
        inner.applied.extend_from_slice(events);
        inner.check_conditions();

        Ok(stats)
    }

    fn decode_row(&self, event: &ChangeEvent) -> Option<DecodedRow> {
        self.handler.decode_row(event)
    }
}

/// A [`BatchHandler`] accepting every batch without writing anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBatchHandler;

impl BatchHandler for NoopBatchHandler {
    async fn handle_batch(&self, events: &[ChangeEvent]) -> LdrResult<BatchStats> {
        let bytes_applied = events.iter().map(ChangeEvent::byte_size).sum();

        Ok(BatchStats {
            rows_applied: events.len() as u64,
            bytes_applied,
            ..BatchStats::default()
        })
    }
}

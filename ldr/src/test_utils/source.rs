use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::{Mutex, Notify};

use crate::error::{LdrError, LdrResult};
use crate::source::{ChangeSource, FlowPartition, FlowPlan, PartitionId, StreamMessage};
use crate::types::{ChangeEvent, Timestamp};

pub type MemoryChangeStream = BoxStream<'static, LdrResult<StreamMessage>>;

#[derive(Debug, Default)]
struct Inner {
    plan: FlowPlan,
    plan_error: Option<LdrError>,
    logs: HashMap<PartitionId, Vec<StreamMessage>>,
    /// Errors delivered once, ahead of the log, to the next reader of the partition.
    errors: HashMap<PartitionId, VecDeque<LdrError>>,
    plan_calls: Vec<Timestamp>,
    subscriptions: Vec<(PartitionId, Timestamp)>,
}

impl Inner {
    fn next(&mut self, partition_id: PartitionId, position: usize) -> Option<LdrResult<StreamMessage>> {
        if let Some(err) = self
            .errors
            .get_mut(&partition_id)
            .and_then(VecDeque::pop_front)
        {
            return Some(Err(err));
        }

        self.logs
            .get(&partition_id)
            .and_then(|log| log.get(position))
            .cloned()
            .map(Ok)
    }
}

/// A [`ChangeSource`] replaying an in-memory log per partition.
///
/// Every subscription reads its partition's log from the start, the way a producer resends
/// everything after the resume timestamp. Streams never end, they wait for more messages.
#[derive(Debug, Clone, Default)]
pub struct MemoryChangeSource {
    inner: Arc<Mutex<Inner>>,
    appended: Arc<Notify>,
}

impl MemoryChangeSource {
    pub fn new(plan: FlowPlan) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                plan,
                ..Inner::default()
            })),
            appended: Arc::new(Notify::new()),
        }
    }

    pub async fn set_plan(&self, plan: FlowPlan) {
        self.inner.lock().await.plan = plan;
    }

    /// Makes the next call to [`ChangeSource::plan`] fail with `err`.
    pub async fn fail_next_plan(&self, err: LdrError) {
        self.inner.lock().await.plan_error = Some(err);
    }

    pub async fn push_events(&self, partition_id: PartitionId, events: Vec<ChangeEvent>) {
        self.push(partition_id, StreamMessage::Events(events)).await;
    }

    pub async fn push_checkpoint(&self, partition_id: PartitionId, ts: Timestamp) {
        self.push(partition_id, StreamMessage::Checkpoint(ts)).await;
    }

    /// Delivers `err` once to the current or next reader of the partition.
    pub async fn push_error(&self, partition_id: PartitionId, err: LdrError) {
        self.inner
            .lock()
            .await
            .errors
            .entry(partition_id)
            .or_default()
            .push_back(err);
        self.appended.notify_waiters();
    }

    /// Resume timestamps of every call to [`ChangeSource::plan`].
    pub async fn plan_calls(&self) -> Vec<Timestamp> {
        self.inner.lock().await.plan_calls.clone()
    }

    pub async fn subscriptions(&self) -> Vec<(PartitionId, Timestamp)> {
        self.inner.lock().await.subscriptions.clone()
    }

    async fn push(&self, partition_id: PartitionId, message: StreamMessage) {
        self.inner
            .lock()
            .await
            .logs
            .entry(partition_id)
            .or_default()
            .push(message);
        self.appended.notify_waiters();
    }
}

impl ChangeSource for MemoryChangeSource {
    type Stream = MemoryChangeStream;

    async fn plan(&self, resume_from: Timestamp) -> LdrResult<FlowPlan> {
        let mut inner = self.inner.lock().await;
        inner.plan_calls.push(resume_from);
        if let Some(err) = inner.plan_error.take() {
            return Err(err);
        }

        Ok(inner.plan.clone())
    }

    async fn subscribe(
        &self,
        partition: &FlowPartition,
        resume_from: Timestamp,
    ) -> LdrResult<Self::Stream> {
        self.inner
            .lock()
            .await
            .subscriptions
            .push((partition.id, resume_from));

        let state = (self.clone(), partition.id, 0usize);
        let stream = stream::unfold(state, |(source, partition_id, position)| async move {
            let appended = source.appended.clone();
            loop {
                let notified = appended.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let next = source.inner.lock().await.next(partition_id, position);
                match next {
                    Some(Err(err)) => return Some((Err(err), (source, partition_id, position))),
                    Some(Ok(message)) => {
                        return Some((Ok(message), (source, partition_id, position + 1)));
                    }
                    None => notified.await,
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// A plan with one partition per id, each on its own node.
pub fn plan_with_partitions(ids: impl IntoIterator<Item = PartitionId>) -> FlowPlan {
    FlowPlan::new(
        ids.into_iter()
            .map(|id| FlowPartition {
                id,
                node_id: id,
                address: format!("producer-{id}:26257"),
            })
            .collect(),
    )
}

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{LdrError, LdrResult};
use crate::source::{NodeTopology, ProducerClient, StreamStatus, TopologyProvider};
use crate::types::Timestamp;

#[derive(Debug)]
struct ProducerInner {
    status: StreamStatus,
    error: Option<LdrError>,
    heartbeats: Vec<Option<Timestamp>>,
}

/// A [`ProducerClient`] answering heartbeats with a status set by the test.
#[derive(Debug, Clone)]
pub struct ScriptedProducer {
    inner: Arc<Mutex<ProducerInner>>,
}

impl ScriptedProducer {
    /// Creates a producer whose stream is active.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProducerInner {
                status: StreamStatus::Active,
                error: None,
                heartbeats: Vec::new(),
            })),
        }
    }

    pub async fn set_status(&self, status: StreamStatus) {
        self.inner.lock().await.status = status;
    }

    /// Makes every following heartbeat fail with `err`, or succeed again with `None`.
    pub async fn fail_heartbeats(&self, err: Option<LdrError>) {
        self.inner.lock().await.error = err;
    }

    /// Frontiers reported by every heartbeat so far.
    pub async fn heartbeats(&self) -> Vec<Option<Timestamp>> {
        self.inner.lock().await.heartbeats.clone()
    }
}

impl Default for ScriptedProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProducerClient for ScriptedProducer {
    async fn heartbeat(
        &self,
        _stream_id: &str,
        frontier: Option<Timestamp>,
    ) -> LdrResult<StreamStatus> {
        let mut inner = self.inner.lock().await;
        inner.heartbeats.push(frontier);
        if let Some(err) = &inner.error {
            return Err(err.clone());
        }

        Ok(inner.status)
    }
}

#[derive(Debug, Default)]
struct TopologyInner {
    topology: NodeTopology,
    samples: usize,
}

/// A [`TopologyProvider`] returning a topology set by the test.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTopology {
    inner: Arc<Mutex<TopologyInner>>,
}

impl ScriptedTopology {
    pub fn new(topology: NodeTopology) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TopologyInner {
                topology,
                samples: 0,
            })),
        }
    }

    pub async fn set_topology(&self, topology: NodeTopology) {
        self.inner.lock().await.topology = topology;
    }

    /// Number of times the topology was sampled.
    pub async fn samples(&self) -> usize {
        self.inner.lock().await.samples
    }
}

impl TopologyProvider for ScriptedTopology {
    async fn topology(&self) -> LdrResult<NodeTopology> {
        let mut inner = self.inner.lock().await;
        inner.samples += 1;

        Ok(inner.topology.clone())
    }
}

use std::collections::BTreeSet;

use tracing::{Instrument, debug, info};

use crate::bail;
use crate::concurrency::shutdown::{ShutdownRx, wait_for_shutdown};
use crate::error::{ErrorKind, LdrError, LdrResult};
use crate::settings::DynamicSettings;
use crate::source::{FlowPlan, NodeId, NodeTopology, TopologyProvider};
use crate::workers::base::{Worker, WorkerType};
use crate::workers::heartbeat::MonitorWorkerHandle;

/// Detects when the plan of a flow no longer matches the local topology.
#[derive(Debug, Clone)]
pub struct Replanner {
    planned_nodes: BTreeSet<NodeId>,
    signaled: bool,
}

impl Replanner {
    pub fn new(plan: &FlowPlan) -> Self {
        Self {
            planned_nodes: plan.node_ids(),
            signaled: false,
        }
    }

    /// Fraction of the ideal nodes of `topology` the plan does not use.
    pub fn missing_fraction(&self, topology: &NodeTopology) -> f64 {
        let ideal = topology.ideal_nodes();
        if ideal.is_empty() {
            return 0.0;
        }

        let missing = ideal.difference(&self.planned_nodes).count();

        missing as f64 / ideal.len() as f64
    }

    /// Fails with [`ErrorKind::PlanChanged`] if more than `threshold` of the ideal nodes are
    /// missing from the plan. A threshold of `0` disables the check.
    ///
    /// Signals at most once.
    pub fn check(&mut self, topology: &NodeTopology, threshold: f64) -> LdrResult<()> {
        if self.signaled || threshold <= 0.0 {
            return Ok(());
        }

        let fraction = self.missing_fraction(topology);
        debug!(fraction, threshold, "checked flow plan against topology");

        if fraction > threshold {
            self.signaled = true;
            bail!(
                ErrorKind::PlanChanged,
                "Replication flow plan is out of date",
                format!(
                    "{:.0}% of the nodes holding leases are not in the plan, threshold is {:.0}%",
                    fraction * 100.0,
                    threshold * 100.0
                )
            );
        }

        Ok(())
    }
}

/// Samples the topology on an interval and ends with [`ErrorKind::PlanChanged`] once the plan is
/// out of date.
#[derive(Debug)]
pub struct ReplannerWorker<T> {
    replanner: Replanner,
    topology: T,
    settings: DynamicSettings,
    shutdown_rx: ShutdownRx,
}

impl<T> ReplannerWorker<T> {
    pub fn new(
        plan: &FlowPlan,
        topology: T,
        settings: DynamicSettings,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            replanner: Replanner::new(plan),
            topology,
            settings,
            shutdown_rx,
        }
    }
}

impl<T> ReplannerWorker<T>
where
    T: TopologyProvider,
{
    async fn run(mut self) -> LdrResult<()> {
        loop {
            // The first sample is taken one interval after the flow started.
            let frequency = self.settings.snapshot().replan_frequency;
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    info!("replanner worker stopped by shutdown");
                    return Ok(());
                }
                _ = tokio::time::sleep(frequency) => {}
            }

            let threshold = self.settings.snapshot().replan_threshold;
            if threshold <= 0.0 {
                continue;
            }

            let topology = self.topology.topology().await?;
            self.replanner.check(&topology, threshold)?;
        }
    }
}

impl<T> Worker<MonitorWorkerHandle, WorkerType> for ReplannerWorker<T>
where
    T: TopologyProvider + Send + Sync + 'static,
{
    type Error = LdrError;

    async fn start(self) -> LdrResult<MonitorWorkerHandle> {
        info!("starting replanner worker");

        let span = tracing::info_span!("replanner_worker");
        let handle = tokio::spawn(self.run().instrument(span));

        Ok(MonitorWorkerHandle::new(WorkerType::Replanner, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::FlowPartition;

    fn plan(nodes: &[NodeId]) -> FlowPlan {
        FlowPlan::new(
            nodes
                .iter()
                .enumerate()
                .map(|(id, node_id)| FlowPartition {
                    id: id as u32,
                    node_id: *node_id,
                    address: format!("n{node_id}"),
                })
                .collect(),
        )
    }

    fn topology(nodes: &[NodeId]) -> NodeTopology {
        nodes.iter().fold(NodeTopology::default(), |topology, node_id| {
            topology.with_node(*node_id, format!("n{node_id}"), 1)
        })
    }

    #[test]
    fn signals_once_when_too_many_nodes_are_missing() {
        let mut replanner = Replanner::new(&plan(&[1]));
        let grown = topology(&[1, 2, 3]);

        assert!((replanner.missing_fraction(&grown) - 2.0 / 3.0).abs() < f64::EPSILON);
        assert!(replanner.check(&grown, 0.9).is_ok());

        let err = replanner.check(&grown, 0.1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PlanChanged);
        assert!(replanner.check(&grown, 0.1).is_ok());
    }

    #[test]
    fn zero_threshold_disables_replanning() {
        let mut replanner = Replanner::new(&plan(&[1]));

        assert!(replanner.check(&topology(&[1, 2, 3, 4]), 0.0).is_ok());
    }

    #[test]
    fn nodes_without_leases_are_ignored() {
        let replanner = Replanner::new(&plan(&[1, 2]));
        let topology = topology(&[1, 2]).with_node(3, "n3", 0);

        assert_eq!(replanner.missing_fraction(&topology), 0.0);
    }
}

//! Planner state and top-level orchestration.
//!
//! The planner owns a working topology (a clone of the snapshot) and the
//! evolving plan. Every public entry point drives the working topology
//! toward the placement invariants through the two primitives only; the
//! caller decides which modes to run and in what order (port reduction
//! first, then either defect fixing or a full rebalance).

use crate::candidates;
use crate::plan::{FailoverOption, Plan};
use crate::primitives;
use shardpilot_common::config::{PlannerSettings, ITERATION_LIMIT, MAX_PORT};
use shardpilot_common::{Error, NodeId, Result, Severity};
use shardpilot_topology::{checks, Topology};
use tracing::debug;

/// Deterministic transformation of a topology into an ordered command
/// plan.
pub struct Planner {
    pub(crate) topology: Topology,
    pub(crate) plan: Plan,
    pub(crate) settings: PlannerSettings,
}

impl Planner {
    #[must_use]
    pub fn new(topology: Topology, settings: PlannerSettings) -> Self {
        Self {
            topology,
            plan: Plan::new(),
            settings,
        }
    }

    /// The working topology: the projected cluster state after applying
    /// the plan produced so far.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    #[must_use]
    pub fn settings(&self) -> &PlannerSettings {
        &self.settings
    }

    #[must_use]
    pub fn into_plan(self) -> Plan {
        self.plan
    }

    /// Full rebalance: level out master placement, then replica
    /// placement. Rejects infeasible layouts before emitting anything;
    /// skipped entirely when the checks are already clean, unless
    /// `force` is set.
    pub fn rebalance(&mut self, force: bool) -> Result<()> {
        if !checks::distribution_feasible(
            &self.topology,
            self.settings.replicas,
            self.settings.max_port,
        ) {
            return Err(Error::InfeasibleDistribution {
                groups: self.topology.groups(self.settings.max_port).len(),
                required: self.settings.replicas,
            });
        }
        let severity = checks::severity(&self.topology, &self.settings);
        if severity == Severity::Ok && !force {
            debug!("checks are clean, skipping rebalance");
            return Ok(());
        }
        self.level_out_masters()?;
        self.level_out_replicas()
    }

    /// Retire every master above the configured port ceiling by failing
    /// it over to an eligible lower-port replica, reparenting one first
    /// when none is attached yet.
    pub fn reduce_ports(&mut self) -> Result<()> {
        let ceiling = self.settings.max_port;
        if self.topology.max_port().unwrap_or(0) <= ceiling {
            return Ok(());
        }
        for _ in 0..ITERATION_LIMIT {
            let retiring: Vec<NodeId> = self
                .topology
                .masters(MAX_PORT)
                .iter()
                .filter(|m| m.port > ceiling)
                .map(|m| m.node_id.clone())
                .collect();
            if retiring.is_empty() {
                return Ok(());
            }
            for master in &retiring {
                if let Some(replica) =
                    candidates::find_failover_candidate(&self.topology, master, ceiling)
                {
                    self.failover(&replica)?;
                    continue;
                }
                let replica = candidates::find_replica_for_master(
                    &self.topology,
                    master,
                    self.settings.replicas,
                    ceiling,
                )
                .ok_or_else(|| Error::NoReplicaCandidate(master.clone()))?;
                self.replicate(master, &replica)?;
                self.failover(&replica)?;
                break;
            }
        }
        Err(Error::IterationLimit {
            stage: "port reduction",
            limit: ITERATION_LIMIT,
        })
    }

    pub(crate) fn replicate(&mut self, master: &NodeId, replica: &NodeId) -> Result<()> {
        primitives::plan_replicate(&mut self.topology, &mut self.plan, master, replica)
    }

    pub(crate) fn failover(&mut self, replica: &NodeId) -> Result<()> {
        primitives::plan_failover(
            &mut self.topology,
            &mut self.plan,
            replica,
            FailoverOption::Takeover,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::CommandKind;
    use shardpilot_topology::test_support::topology;
    use shardpilot_topology::GroupingMode;

    fn settings(replicas: usize, max_port: u16) -> PlannerSettings {
        PlannerSettings {
            replicas,
            max_port,
            ..PlannerSettings::default()
        }
    }

    #[test]
    fn port_reduction_prefers_a_plain_failover() {
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7220, None),
                ("s1", "10.0.0.2", 7205, Some("m1")),
                ("s2", "10.0.0.3", 7208, Some("m1")),
            ],
        );
        let mut planner = Planner::new(topo, settings(2, 7210));
        planner.reduce_ports().unwrap();

        let kinds: Vec<CommandKind> = planner.plan().commands().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CommandKind::Failover]);
        assert!(planner
            .topology()
            .masters(shardpilot_common::config::MAX_PORT)
            .iter()
            .all(|m| m.port <= 7210));
    }

    #[test]
    fn port_reduction_reparents_when_no_replica_is_eligible() {
        // m1's only replica also lives above the ceiling; a replica must
        // be borrowed from m2's shard first.
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7220, None),
                ("s1", "10.0.0.2", 7220, Some("m1")),
                ("m2", "10.0.0.2", 7200, None),
                ("s2", "10.0.0.3", 7200, Some("m2")),
            ],
        );
        let mut planner = Planner::new(topo, settings(1, 7210));
        planner.reduce_ports().unwrap();

        let kinds: Vec<CommandKind> = planner.plan().commands().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CommandKind::Replicate, CommandKind::Failover]);
        assert!(planner
            .topology()
            .masters(shardpilot_common::config::MAX_PORT)
            .iter()
            .all(|m| m.port <= 7210));
    }

    #[test]
    fn port_reduction_is_a_noop_below_the_ceiling() {
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("s1", "10.0.0.2", 7000, Some("m1")),
            ],
        );
        let mut planner = Planner::new(topo, settings(1, 7210));
        planner.reduce_ports().unwrap();
        assert!(planner.plan().is_empty());
    }
}

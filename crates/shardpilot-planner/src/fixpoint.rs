//! Fix-only mode: repair correctness defects one at a time, in priority
//! order, re-checking after every step.
//!
//! The loop restarts from the highest priority after each successful
//! repair, so a reparenting that incidentally cures a lower-priority
//! defect is never followed by a stale fix. Termination is either
//! severity dropping to WARNING or the iteration safety bound.

use crate::candidates;
use crate::planner::Planner;
use crate::primitives;
use shardpilot_common::config::ITERATION_LIMIT;
use shardpilot_common::{Error, NodeId, Result, Severity};
use shardpilot_topology::checks::{self, ShardIssue};
use shardpilot_topology::{GroupingMode, Node};
use std::collections::BTreeMap;
use tracing::debug;

impl Planner {
    /// Repair replica-safety defects without touching master balance.
    ///
    /// Priority: masters with no replicas, master/replica co-location,
    /// masters short of replicas, replica concentration.
    pub fn fix_defects(&mut self) -> Result<()> {
        for _ in 0..ITERATION_LIMIT {
            let settings = self.settings;

            let orphaned = checks::masters_without_replicas(&self.topology, settings.max_port);
            if self.attach_replica_to_first(&orphaned)? {
                continue;
            }

            let colocated = checks::master_replica_colocation(
                &self.topology,
                settings.replicas,
                settings.max_port,
            );
            if self.reparent_offending_replica(&colocated)? {
                continue;
            }

            let short: Vec<NodeId> =
                checks::missing_replicas(&self.topology, settings.replicas, settings.max_port)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect();
            if self.attach_replica_to_first(&short)? {
                continue;
            }

            let concentrated = checks::replica_concentration(
                &self.topology,
                settings.replicas,
                settings.max_port,
            );
            if self.reparent_offending_replica(&concentrated)? {
                continue;
            }

            return match checks::severity(&self.topology, &self.settings) {
                Severity::Ok | Severity::Warning => Ok(()),
                Severity::Critical => Err(Error::stalled(
                    "critical defects remain but no resolver can make progress",
                )),
            };
        }
        Err(Error::IterationLimit {
            stage: "defect fixing",
            limit: ITERATION_LIMIT,
        })
    }

    /// Give the first listed master one more replica. One repair per
    /// call; the caller re-checks and comes back.
    fn attach_replica_to_first(&mut self, masters: &[NodeId]) -> Result<bool> {
        let Some(master) = masters.first() else {
            return Ok(false);
        };
        let replica = candidates::find_replica_for_master(
            &self.topology,
            master,
            self.settings.replicas,
            self.settings.max_port,
        )
        .ok_or_else(|| Error::NoReplicaCandidate(master.clone()))?;
        debug!(%master, %replica, "attaching replica to under-replicated master");
        self.replicate(master, &replica)
            .map(|()| true)
    }

    /// Move one replica named in a co-location or concentration defect to
    /// a master in a non-conflicting group. When no such master exists,
    /// single accepted rebalance steps are interleaved to open one up.
    fn reparent_offending_replica(
        &mut self,
        defects: &BTreeMap<String, Vec<ShardIssue>>,
    ) -> Result<bool> {
        if defects.is_empty() {
            return Ok(false);
        }
        for _ in 0..ITERATION_LIMIT {
            for (group, issues) in defects {
                for issue in issues {
                    for replica in &issue.replicas {
                        // A rebalance step may have promoted this node in
                        // the meantime; it is no longer reparentable.
                        if !self
                            .topology
                            .get(&replica.node_id)
                            .is_some_and(Node::is_replica)
                        {
                            continue;
                        }
                        if let Some(master) = candidates::find_master_for_replica(
                            &self.topology,
                            &replica.node_id,
                            &[group.as_str()],
                            self.settings.replicas,
                            self.settings.max_port,
                        ) {
                            debug!(replica = %replica.node_id, %master, "reparenting replica out of {group}");
                            self.replicate(&master, &replica.node_id)?;
                            return Ok(true);
                        }
                    }
                }
            }
            // Re-running the search on unchanged state cannot succeed, so
            // a refused rebalance step means the defect is stuck.
            if !self.rebalance_step()? {
                return Err(Error::stalled(
                    "no reparenting candidate and no accepted rebalance step; \
                     the cluster may lack masters outside the offending group",
                ));
            }
        }
        Err(Error::IterationLimit {
            stage: "replica defect resolution",
            limit: ITERATION_LIMIT,
        })
    }

    /// One rebalance iteration: fail over the first candidate that
    /// strictly reduces the canonical skew metric and whose endpoint has
    /// no failover scheduled yet. Returns whether a step was taken.
    pub(crate) fn rebalance_step(&mut self) -> Result<bool> {
        let max_port = self.settings.max_port;
        let current = checks::master_skew_pct(&self.topology, max_port);
        let triggered = match self.topology.mode() {
            GroupingMode::Host => current > 0.0,
            GroupingMode::Datacenter => current > self.settings.skew,
        };

        if triggered {
            let shares = checks::group_master_shares(&self.topology, max_port);
            let mut ranked: Vec<(String, f64)> = shares.into_iter().collect();
            ranked.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            for (group, _) in ranked {
                let group_masters: Vec<NodeId> = self
                    .topology
                    .groups(max_port)
                    .get(group.as_str())
                    .map(|nodes| {
                        nodes
                            .iter()
                            .filter(|n| n.is_master())
                            .map(|n| n.node_id.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                for master in group_masters {
                    if let Some(step) = self.accepted_failover_reducing_skew(&master, current)? {
                        self.failover(&step)?;
                        return Ok(true);
                    }
                }
            }
        }

        if self.topology.mode() == GroupingMode::Datacenter {
            let offending =
                checks::in_group_master_skew(&self.topology, self.settings.group_skew, max_port);
            let old_spreads: BTreeMap<&String, f64> = offending
                .iter()
                .map(|(group, hosts)| (group, value_spread(hosts)))
                .collect();
            for (group, host_shares) in &offending {
                let mut ranked_hosts: Vec<(&String, f64)> =
                    host_shares.iter().map(|(h, v)| (h, *v)).collect();
                ranked_hosts.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                for (host, _) in ranked_hosts {
                    let host_masters: Vec<NodeId> = self
                        .topology
                        .within(max_port)
                        .filter(|n| {
                            n.host == **host
                                && n.is_master()
                                && n.group(self.topology.mode()) == *group
                        })
                        .map(|n| n.node_id.clone())
                        .collect();
                    for master in host_masters {
                        let Some(candidate) =
                            candidates::find_failover_candidate(&self.topology, &master, max_port)
                        else {
                            continue;
                        };
                        let endpoint = self.topology.require(&candidate)?.endpoint();
                        if self.plan.has_failover_at(&endpoint) {
                            continue;
                        }
                        let preview = primitives::preview_failover(&self.topology, &candidate)?;
                        let new_spreads = checks::subgroup_master_shares(&preview, max_port);
                        let improves = old_spreads.iter().any(|(g, old)| {
                            *old > new_spreads.get(*g).map_or(0.0, value_spread)
                        });
                        if improves {
                            self.failover(&candidate)?;
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }

    /// Candidate failover for `master` passing the acceptance rule, if
    /// any.
    fn accepted_failover_reducing_skew(
        &self,
        master: &NodeId,
        current_skew: f64,
    ) -> Result<Option<NodeId>> {
        let max_port = self.settings.max_port;
        let Some(candidate) = candidates::find_failover_candidate(&self.topology, master, max_port)
        else {
            return Ok(None);
        };
        let endpoint = self.topology.require(&candidate)?.endpoint();
        if self.plan.has_failover_at(&endpoint) {
            return Ok(None);
        }
        let preview = primitives::preview_failover(&self.topology, &candidate)?;
        if checks::master_skew_pct(&preview, max_port) < current_skew {
            Ok(Some(candidate))
        } else {
            Ok(None)
        }
    }
}

fn value_spread(values: &BTreeMap<String, f64>) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values.values() {
        min = min.min(*v);
        max = max.max(*v);
    }
    if min.is_finite() {
        max - min
    } else {
        0.0
    }
}

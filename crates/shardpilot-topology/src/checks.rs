//! Pure placement checks over a topology.
//!
//! Every check returns structured data describing the defect; none of
//! them mutate anything or decide what to do about it. The planner and
//! the CLI both consume these results, so the same arithmetic serves the
//! defect report, the monitoring exit code and the rebalance acceptance
//! rule.

use crate::node::Node;
use crate::topology::{partition_by_group, Topology};
use shardpilot_common::config::PlannerSettings;
use shardpilot_common::{NodeId, Severity};
use std::collections::{BTreeMap, BTreeSet};

/// A master together with the replicas involved in one placement defect.
#[derive(Clone, Debug)]
pub struct ShardIssue {
    pub master: Node,
    pub replicas: Vec<Node>,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Replica pairs whose reported master is itself flagged `slave`.
#[must_use]
pub fn slave_of_slave(topo: &Topology, max_port: u16) -> Vec<(NodeId, NodeId)> {
    let mut pairs = Vec::new();
    for replica in topo.replicas(max_port) {
        // A dangling master reference is reported by other checks.
        if let Ok(master) = topo.master_of(&replica.node_id) {
            if master.is_replica() {
                pairs.push((replica.node_id.clone(), master.node_id.clone()));
            }
        }
    }
    pairs
}

/// Masters sharing a fault domain with one of their replicas.
///
/// Only a defect when the replicas placed in other groups are too few to
/// cover the desired count on their own.
#[must_use]
pub fn master_replica_colocation(
    topo: &Topology,
    replicas: usize,
    max_port: u16,
) -> BTreeMap<String, Vec<ShardIssue>> {
    let mut defects: BTreeMap<String, Vec<ShardIssue>> = BTreeMap::new();
    for (group, group_nodes) in topo.groups(max_port) {
        for master in group_nodes.iter().filter(|n| n.is_master()) {
            let shard_replicas = topo.replicas_of(&master.node_id, max_port);
            let replica_groups: Vec<&str> =
                shard_replicas.iter().map(|n| n.group(topo.mode())).collect();
            let foreign = replica_groups.iter().filter(|g| **g != group).count();
            if replica_groups.contains(&group) && foreign < replicas {
                defects.entry(group.to_string()).or_default().push(ShardIssue {
                    master: (*master).clone(),
                    replicas: shard_replicas.into_iter().cloned().collect(),
                });
            }
        }
    }
    defects
}

/// Groups holding several replicas of one master.
///
/// Suppressed when the distribution is infeasible: with too few fault
/// domains, piling replicas up is unavoidable and not actionable. A
/// master whose replicas already span enough distinct groups is also not
/// a defect, surplus copies are allowed to share a domain.
#[must_use]
pub fn replica_concentration(
    topo: &Topology,
    replicas: usize,
    max_port: u16,
) -> BTreeMap<String, Vec<ShardIssue>> {
    let mut defects: BTreeMap<String, Vec<ShardIssue>> = BTreeMap::new();
    if !distribution_feasible(topo, replicas, max_port) {
        return defects;
    }

    for (group, group_nodes) in topo.groups(max_port) {
        let group_replicas: Vec<&Node> =
            group_nodes.iter().copied().filter(|n| n.is_replica()).collect();
        let master_ids: BTreeSet<&NodeId> =
            group_replicas.iter().filter_map(|n| n.master_id.as_ref()).collect();

        for master_id in master_ids {
            let local: Vec<&Node> = group_replicas
                .iter()
                .copied()
                .filter(|n| n.master_id.as_ref() == Some(master_id))
                .collect();
            let shard_replicas = topo.replicas_of(master_id, max_port);
            let spread = partition_by_group(shard_replicas.iter().copied(), topo.mode()).len();
            if spread >= replicas || local.len() < 2 {
                continue;
            }
            if let Some(master) = topo.get(master_id) {
                defects.entry(group.to_string()).or_default().push(ShardIssue {
                    master: master.clone(),
                    replicas: local.into_iter().cloned().collect(),
                });
            }
        }
    }
    defects
}

/// Masters whose replica count is below the desired count, with the
/// actual count, in master `(host, port)` order.
#[must_use]
pub fn missing_replicas(topo: &Topology, replicas: usize, max_port: u16) -> Vec<(NodeId, usize)> {
    topo.replica_counts(max_port)
        .into_iter()
        .filter(|(_, count)| *count < replicas)
        .collect()
}

/// Masters with no replicas at all, in master `(host, port)` order.
#[must_use]
pub fn masters_without_replicas(topo: &Topology, max_port: u16) -> Vec<NodeId> {
    missing_replicas(topo, 1, max_port)
        .into_iter()
        .map(|(id, _)| id)
        .collect()
}

/// Master percentage per group, zero-master groups included at 0%.
#[must_use]
pub fn group_master_shares(topo: &Topology, max_port: u16) -> BTreeMap<String, f64> {
    let total = topo.masters(max_port).len();
    topo.groups(max_port)
        .into_iter()
        .map(|(group, nodes)| {
            let masters = nodes.iter().filter(|n| n.is_master()).count();
            let share = if total == 0 {
                0.0
            } else {
                round2(100.0 / total as f64 * masters as f64)
            };
            (group.to_string(), share)
        })
        .collect()
}

/// Canonical skew metric: master percentage spread `max - min` across
/// all groups. Used identically by the check and by the rebalance
/// acceptance rule.
#[must_use]
pub fn master_skew_pct(topo: &Topology, max_port: u16) -> f64 {
    spread(group_master_shares(topo, max_port).values().copied())
}

/// The per-group shares when their spread exceeds `skew` percentage
/// points, `None` when the distribution is acceptable.
#[must_use]
pub fn group_master_skew(
    topo: &Topology,
    skew: f64,
    max_port: u16,
) -> Option<BTreeMap<String, f64>> {
    let shares = group_master_shares(topo, max_port);
    if shares.is_empty() || spread(shares.values().copied()) <= skew {
        return None;
    }
    Some(shares)
}

/// Master percentage per host inside each multi-host group, relative to
/// the group's own master count.
#[must_use]
pub fn subgroup_master_shares(
    topo: &Topology,
    max_port: u16,
) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut shares = BTreeMap::new();
    for (group, group_nodes) in topo.groups(max_port) {
        let hosts: BTreeSet<&str> = group_nodes.iter().map(|n| n.host.as_str()).collect();
        if hosts.len() < 2 {
            continue;
        }
        let group_masters = group_nodes.iter().filter(|n| n.is_master()).count();
        let per_host: BTreeMap<String, f64> = hosts
            .into_iter()
            .map(|host| {
                let count = group_nodes
                    .iter()
                    .filter(|n| n.host == host && n.is_master())
                    .count();
                let share = if group_masters == 0 {
                    0.0
                } else {
                    round2(100.0 / group_masters as f64 * count as f64)
                };
                (host.to_string(), share)
            })
            .collect();
        shares.insert(group.to_string(), per_host);
    }
    shares
}

/// Groups whose internal per-host spread exceeds `group_skew` points.
#[must_use]
pub fn in_group_master_skew(
    topo: &Topology,
    group_skew: f64,
    max_port: u16,
) -> BTreeMap<String, BTreeMap<String, f64>> {
    subgroup_master_shares(topo, max_port)
        .into_iter()
        .filter(|(_, per_host)| spread(per_host.values().copied()) > group_skew)
        .collect()
}

/// Masters owning no slots.
#[must_use]
pub fn masters_without_slots(topo: &Topology) -> Vec<Node> {
    topo.masters(shardpilot_common::config::MAX_PORT)
        .into_iter()
        .filter(|n| !n.has_slots())
        .cloned()
        .collect()
}

/// Nodes flagged `fail` by the cluster.
#[must_use]
pub fn failed_nodes(topo: &Topology) -> Vec<Node> {
    topo.nodes().iter().filter(|n| n.is_failed()).cloned().collect()
}

/// Whether every shard can get `replicas` copies in distinct groups, each
/// differing from the master's group.
///
/// Greedily consumes one node from each of the `replicas + 1` largest
/// remaining groups per shard; ties broken by group name.
#[must_use]
pub fn distribution_feasible(topo: &Topology, replicas: usize, max_port: u16) -> bool {
    let mut sizes: Vec<(String, usize)> = topo
        .groups(max_port)
        .into_iter()
        .map(|(group, nodes)| (group.to_string(), nodes.len()))
        .collect();
    let shards = topo.masters(max_port).len();

    for _ in 0..shards {
        if sizes.len() < replicas + 1 {
            return false;
        }
        sizes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for entry in sizes.iter_mut().take(replicas + 1) {
            entry.1 -= 1;
        }
        sizes.retain(|(_, size)| *size > 0);
    }
    true
}

fn spread(values: impl Iterator<Item = f64>) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut any = false;
    for v in values {
        any = true;
        min = min.min(v);
        max = max.max(v);
    }
    if any {
        max - min
    } else {
        0.0
    }
}

/// All placement defects of a topology, collected in one pass.
#[derive(Clone, Debug)]
pub struct DefectReport {
    pub slave_of_slave: Vec<(NodeId, NodeId)>,
    pub colocation: BTreeMap<String, Vec<ShardIssue>>,
    pub concentration: BTreeMap<String, Vec<ShardIssue>>,
    pub missing_replicas: Vec<(NodeId, usize)>,
    pub without_replicas: Vec<NodeId>,
    pub group_skew: Option<BTreeMap<String, f64>>,
    pub in_group_skew: BTreeMap<String, BTreeMap<String, f64>>,
}

impl DefectReport {
    /// Run every check with the given settings.
    #[must_use]
    pub fn collect(topo: &Topology, settings: &PlannerSettings) -> Self {
        Self {
            slave_of_slave: slave_of_slave(topo, settings.max_port),
            colocation: master_replica_colocation(topo, settings.replicas, settings.max_port),
            concentration: replica_concentration(topo, settings.replicas, settings.max_port),
            missing_replicas: missing_replicas(topo, settings.replicas, settings.max_port),
            without_replicas: masters_without_replicas(topo, settings.max_port),
            group_skew: group_master_skew(topo, settings.skew, settings.max_port),
            in_group_skew: in_group_master_skew(topo, settings.group_skew, settings.max_port),
        }
    }

    /// Monitoring severity of the collected defects.
    #[must_use]
    pub fn severity(&self) -> Severity {
        if !self.colocation.is_empty()
            || !self.concentration.is_empty()
            || !self.missing_replicas.is_empty()
            || !self.without_replicas.is_empty()
        {
            return Severity::Critical;
        }
        if self.group_skew.is_some() || !self.in_group_skew.is_empty() {
            return Severity::Warning;
        }
        Severity::Ok
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.severity() == Severity::Ok
    }
}

/// Convenience wrapper: severity of a topology under the given settings.
#[must_use]
pub fn severity(topo: &Topology, settings: &PlannerSettings) -> Severity {
    DefectReport::collect(topo, settings).severity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::GroupingMode;
    use crate::test_support::{dc_topology, replica, topology};
    use shardpilot_common::config::MAX_PORT;

    fn settings(replicas: usize) -> PlannerSettings {
        PlannerSettings {
            replicas,
            ..PlannerSettings::default()
        }
    }

    #[test]
    fn reports_slave_of_slave_chains() {
        // s2 replicates from s1, which is itself a replica of m1.
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("s1", "10.0.0.2", 7000, Some("m1")),
                ("s2", "10.0.0.3", 7000, Some("s1")),
            ],
        );
        let pairs = slave_of_slave(&topo, MAX_PORT);
        assert_eq!(pairs, vec![("s2".into(), "s1".into())]);
    }

    #[test]
    fn colocation_requires_insufficient_foreign_cover() {
        // Master and one replica share dc1; the single foreign replica
        // cannot cover R=2 on its own.
        let topo = dc_topology(&[
            ("m1", "10.0.0.1", 7000, None, "dc1"),
            ("s1", "10.0.0.1", 7001, Some("m1"), "dc1"),
            ("s2", "10.0.0.2", 7000, Some("m1"), "dc2"),
            ("m2", "10.0.0.3", 7000, None, "dc3"),
            ("s3", "10.0.0.2", 7001, Some("m2"), "dc2"),
            ("s4", "10.0.0.1", 7002, Some("m2"), "dc1"),
        ]);
        let defects = master_replica_colocation(&topo, 2, MAX_PORT);
        assert_eq!(defects.len(), 1);
        let issues = &defects["dc1"];
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].master.node_id, "m1".into());

        // With R=1 the foreign replica suffices; no defect.
        assert!(master_replica_colocation(&topo, 1, MAX_PORT).is_empty());
    }

    #[test]
    fn concentration_flags_doubled_up_replicas() {
        let topo = dc_topology(&[
            ("m1", "10.0.0.1", 7000, None, "dc1"),
            ("s1", "10.0.0.2", 7000, Some("m1"), "dc2"),
            ("s2", "10.0.0.2", 7001, Some("m1"), "dc2"),
            ("m2", "10.0.0.3", 7000, None, "dc3"),
            ("s3", "10.0.0.1", 7001, Some("m2"), "dc1"),
            ("s4", "10.0.0.2", 7002, Some("m2"), "dc2"),
            ("s5", "10.0.0.3", 7001, Some("m2"), "dc3"),
        ]);
        let defects = replica_concentration(&topo, 2, MAX_PORT);
        assert_eq!(defects.len(), 1);
        let issues = &defects["dc2"];
        assert_eq!(issues[0].master.node_id, "m1".into());
        assert_eq!(issues[0].replicas.len(), 2);
    }

    #[test]
    fn concentration_tolerates_wide_spread_and_infeasibility() {
        // m1 has replicas in two distinct foreign groups plus a doubled
        // one; spread >= R, not a defect.
        let topo = dc_topology(&[
            ("m1", "10.0.0.1", 7000, None, "dc1"),
            ("s1", "10.0.0.2", 7000, Some("m1"), "dc2"),
            ("s2", "10.0.0.2", 7001, Some("m1"), "dc2"),
            ("s3", "10.0.0.3", 7000, Some("m1"), "dc3"),
            ("m2", "10.0.0.4", 7000, None, "dc2"),
            ("s4", "10.0.0.1", 7001, Some("m2"), "dc1"),
            ("s5", "10.0.0.3", 7001, Some("m2"), "dc3"),
        ]);
        assert!(replica_concentration(&topo, 2, MAX_PORT).is_empty());

        // Two groups, R=2: infeasible, so concentration is suppressed.
        let cramped = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("s1", "10.0.0.2", 7000, Some("m1")),
                ("s2", "10.0.0.2", 7001, Some("m1")),
            ],
        );
        assert!(replica_concentration(&cramped, 2, MAX_PORT).is_empty());
    }

    #[test]
    fn replica_count_checks() {
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.2", 7000, None),
                ("s1", "10.0.0.3", 7000, Some("m1")),
            ],
        );
        assert_eq!(
            missing_replicas(&topo, 2, MAX_PORT),
            vec![("m1".into(), 1), ("m2".into(), 0)]
        );
        assert_eq!(masters_without_replicas(&topo, MAX_PORT), vec!["m2".into()]);
    }

    #[test]
    fn shares_and_skew_metric() {
        // 4 masters: 2 on host1, 1 each on host2/host3.
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.1", 7001, None),
                ("m3", "10.0.0.2", 7000, None),
                ("m4", "10.0.0.3", 7000, None),
                ("s1", "10.0.0.2", 7001, Some("m1")),
            ],
        );
        let shares = group_master_shares(&topo, MAX_PORT);
        assert_eq!(shares["10.0.0.1"], 50.0);
        assert_eq!(shares["10.0.0.2"], 25.0);
        assert_eq!(master_skew_pct(&topo, MAX_PORT), 25.0);
        assert!(group_master_skew(&topo, 5.0, MAX_PORT).is_some());
        assert!(group_master_skew(&topo, 25.0, MAX_PORT).is_none());
    }

    #[test]
    fn in_group_skew_only_counts_multi_host_groups() {
        let topo = dc_topology(&[
            ("m1", "10.0.0.1", 7000, None, "dc1"),
            ("m2", "10.0.0.1", 7001, None, "dc1"),
            ("s1", "10.0.0.2", 7000, Some("m1"), "dc1"),
            ("m3", "10.0.0.3", 7000, None, "dc2"),
            ("s2", "10.0.0.3", 7001, Some("m3"), "dc2"),
        ]);
        // dc1 spans two hosts: 100% vs 0% masters. dc2 is single-host.
        let offending = in_group_master_skew(&topo, 30.0, MAX_PORT);
        assert_eq!(offending.len(), 1);
        assert_eq!(offending["dc1"]["10.0.0.1"], 100.0);
        assert_eq!(offending["dc1"]["10.0.0.2"], 0.0);
    }

    #[test]
    fn feasibility_needs_enough_groups_and_capacity() {
        // Two groups, R=2 -> impossible.
        let cramped = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("s1", "10.0.0.2", 7000, Some("m1")),
                ("s2", "10.0.0.2", 7001, Some("m1")),
            ],
        );
        assert!(!distribution_feasible(&cramped, 2, MAX_PORT));

        // Three equal groups of two nodes, two shards, R=2 -> fits.
        let balanced = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("s4", "10.0.0.1", 7001, Some("m2")),
                ("m2", "10.0.0.2", 7000, None),
                ("s1", "10.0.0.2", 7001, Some("m1")),
                ("s2", "10.0.0.3", 7000, Some("m1")),
                ("s3", "10.0.0.3", 7001, Some("m2")),
            ],
        );
        assert!(distribution_feasible(&balanced, 2, MAX_PORT));

        // Same groups but a third shard exhausts the capacity.
        let over = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.2", 7000, None),
                ("m3", "10.0.0.3", 7000, None),
                ("s1", "10.0.0.1", 7001, Some("m2")),
                ("s2", "10.0.0.2", 7001, Some("m1")),
                ("s3", "10.0.0.3", 7001, Some("m1")),
            ],
        );
        assert!(!distribution_feasible(&over, 2, MAX_PORT));
    }

    #[test]
    fn severity_composition() {
        // Clean three-group layout with R=1.
        let clean = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("s1", "10.0.0.2", 7000, Some("m1")),
            ],
        );
        assert_eq!(severity(&clean, &settings(1)), Severity::Warning); // 100% vs 0% skew
        let relaxed = PlannerSettings {
            replicas: 1,
            skew: 100.0,
            ..PlannerSettings::default()
        };
        assert_eq!(severity(&clean, &relaxed), Severity::Ok);

        // A master without replicas is critical regardless of skew.
        let broken = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.2", 7000, None),
                ("s1", "10.0.0.2", 7001, Some("m1")),
            ],
        );
        assert_eq!(severity(&broken, &relaxed), Severity::Critical);
    }
}

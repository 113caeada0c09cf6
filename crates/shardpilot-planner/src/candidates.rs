//! Candidate selection for repairs and rebalancing.
//!
//! All selection walks sorted orderings: groups by master load then name,
//! masters by replica count with the `(host, port)` topology order
//! breaking ties, replicas in topology order. That, and nothing else,
//! makes the planner deterministic.

use shardpilot_common::config::MAX_PORT;
use shardpilot_common::NodeId;
use shardpilot_topology::{checks, Node, Topology};
use std::collections::BTreeSet;

/// Pick a replica of `master_id` whose promotion would pull master load
/// toward a less loaded group.
///
/// Groups other than the master's own are visited in ascending master
/// count; inside a multi-host group, hosts are visited in ascending
/// master count as well. Only replicas with `port <= max_port` qualify.
/// Returns `None` when no replica of the master lives outside its group.
#[must_use]
pub fn find_failover_candidate(
    topo: &Topology,
    master_id: &NodeId,
    max_port: u16,
) -> Option<NodeId> {
    let master_group = topo.group_of(master_id).ok()?;
    let groups = topo.groups(MAX_PORT);

    let mut ranked: Vec<(&str, usize)> = groups
        .iter()
        .filter(|(group, _)| **group != master_group)
        .map(|(group, nodes)| (*group, nodes.iter().filter(|n| n.is_master()).count()))
        .collect();
    ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    for (group, _) in ranked {
        let group_nodes = &groups[group];
        let attached: Vec<&Node> = group_nodes
            .iter()
            .copied()
            .filter(|n| n.port <= max_port && n.master_id.as_ref() == Some(master_id))
            .collect();
        if attached.is_empty() {
            continue;
        }

        let hosts: BTreeSet<&str> = attached.iter().map(|n| n.host.as_str()).collect();
        if hosts.len() > 1 {
            // Several hosts of this group hold a usable replica; prefer
            // the host carrying the fewest of the group's masters.
            let mut host_load: Vec<(&str, usize)> = hosts
                .into_iter()
                .map(|host| {
                    let masters = group_nodes
                        .iter()
                        .filter(|n| n.host == host && n.port <= max_port && n.is_master())
                        .count();
                    (host, masters)
                })
                .collect();
            host_load.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
            let (host, _) = host_load[0];
            return attached
                .iter()
                .filter(|n| n.host == host)
                .last()
                .map(|n| n.node_id.clone());
        }
        return attached.last().map(|n| n.node_id.clone());
    }
    None
}

/// Pick a replica currently attached elsewhere that `master_id` should
/// adopt.
///
/// Replicas flagged by the concentration check come first; otherwise the
/// richest masters donate. The chosen replica's group must be new to the
/// target shard and differ from the master's own group.
#[must_use]
pub fn find_replica_for_master(
    topo: &Topology,
    master_id: &NodeId,
    replicas: usize,
    max_port: u16,
) -> Option<NodeId> {
    let master_group = topo.group_of(master_id).ok()?;
    let covered: BTreeSet<&str> = topo
        .replicas_of(master_id, max_port)
        .iter()
        .map(|n| n.group(topo.mode()))
        .collect();

    let concentrated = checks::replica_concentration(topo, replicas, max_port);
    for (group, issues) in &concentrated {
        if group == master_group {
            continue;
        }
        for issue in issues {
            for replica in &issue.replicas {
                if !covered.contains(replica.group(topo.mode())) {
                    return Some(replica.node_id.clone());
                }
            }
        }
    }

    let mut donors = topo.replica_counts(max_port);
    donors.sort_by(|a, b| b.1.cmp(&a.1));
    for (donor, _) in donors {
        for replica in topo.replicas_of(&donor, max_port) {
            let group = replica.group(topo.mode());
            if covered.contains(group) || group == master_group {
                continue;
            }
            return Some(replica.node_id.clone());
        }
    }
    None
}

/// Pick a new master for `replica_id`, avoiding the replica's own group
/// and every group in `excluded_groups`.
///
/// Masters are visited in ascending replica count. A master with no
/// replica in the replica's group wins outright; one that already has a
/// replica there is acceptable only if its other groups still cover the
/// desired count.
#[must_use]
pub fn find_master_for_replica(
    topo: &Topology,
    replica_id: &NodeId,
    excluded_groups: &[&str],
    replicas: usize,
    max_port: u16,
) -> Option<NodeId> {
    let replica_group = topo.group_of(replica_id).ok()?;
    let current_master = topo.get(replica_id)?.master_id.clone();

    let eligible: BTreeSet<&NodeId> = topo
        .within(max_port)
        .filter(|n| {
            let group = n.group(topo.mode());
            group != replica_group && !excluded_groups.contains(&group)
        })
        .map(|n| &n.node_id)
        .collect();

    let mut ranked = topo.replica_counts(max_port);
    ranked.sort_by(|a, b| a.1.cmp(&b.1));
    for (candidate, _) in ranked {
        if !eligible.contains(&candidate) || Some(&candidate) == current_master.as_ref() {
            continue;
        }
        let shard_groups: BTreeSet<&str> = topo
            .replicas_of(&candidate, MAX_PORT)
            .iter()
            .map(|n| n.group(topo.mode()))
            .collect();
        if !shard_groups.contains(replica_group) {
            return Some(candidate);
        }
        let foreign = shard_groups.iter().filter(|g| **g != replica_group).count();
        if foreign >= replicas {
            return Some(candidate);
        }
    }
    None
}

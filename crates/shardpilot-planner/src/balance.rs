//! Level-out procedures: drive master counts toward the ideal per-group
//! distribution, then give every shard its replica spread.
//!
//! Master leveling works in units of one misplaced master. A group short
//! of masters first tries a plain failover of a local replica whose
//! master sits in a surplus group; only when no such replica exists does
//! it escalate to the two-step reparent-then-failover. Datacenter mode
//! runs the same algorithm at host granularity inside per-DC quotas.

use crate::planner::Planner;
use shardpilot_common::config::MAX_PORT;
use shardpilot_common::{Error, NodeId, Result};
use shardpilot_topology::{partition_by_group, GroupingMode, Node};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Ideal master count per group: floor everywhere, the remainder spread
/// over the first groups in sorted order, clamped to each group's node
/// count with the overflow pushed to the lightest groups that still have
/// headroom.
fn desired_targets(sizes: &BTreeMap<String, usize>, total: usize) -> BTreeMap<String, usize> {
    if sizes.is_empty() {
        return BTreeMap::new();
    }
    let floor = total / sizes.len();
    let remainder = total % sizes.len();
    let mut targets: BTreeMap<String, usize> = sizes
        .keys()
        .enumerate()
        .map(|(i, name)| (name.clone(), floor + usize::from(i < remainder)))
        .collect();

    let mut surplus = 0;
    for (name, target) in &mut targets {
        let capacity = sizes[name];
        if *target > capacity {
            surplus += *target - capacity;
            *target = capacity;
        }
    }
    while surplus > 0 {
        let recipient = targets
            .iter()
            .filter(|(name, target)| **target < sizes[*name])
            .min_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(name, _)| name.clone());
        match recipient {
            Some(name) => {
                *targets.get_mut(&name).expect("recipient exists") += 1;
                surplus -= 1;
            }
            None => break,
        }
    }
    targets
}

impl Planner {
    /// Even out master counts across fault domains.
    pub(crate) fn level_out_masters(&mut self) -> Result<()> {
        match self.topology.mode() {
            GroupingMode::Host => self.level_out_masters_flat(),
            GroupingMode::Datacenter => self.level_out_masters_dc(),
        }
    }

    fn group_sizes(&self) -> BTreeMap<String, usize> {
        self.topology
            .groups(self.settings.max_port)
            .into_iter()
            .map(|(group, nodes)| (group.to_string(), nodes.len()))
            .collect()
    }

    fn masters_in_group(&self, group: &str) -> Vec<NodeId> {
        self.topology
            .groups(self.settings.max_port)
            .get(group)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|n| n.is_master())
                    .map(|n| n.node_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn replicas_in_group(&self, group: &str) -> Vec<NodeId> {
        self.topology
            .groups(self.settings.max_port)
            .get(group)
            .map(|nodes| {
                nodes
                    .iter()
                    .filter(|n| n.is_replica())
                    .map(|n| n.node_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn level_out_masters_flat(&mut self) -> Result<()> {
        let sizes = self.group_sizes();
        if sizes.is_empty() {
            return Ok(());
        }
        let total = self.topology.masters(self.settings.max_port).len();
        let targets = desired_targets(&sizes, total);
        debug!(?targets, "leveling masters across groups");

        for group in sizes.keys() {
            loop {
                let current = self.masters_in_group(group).len();
                let target = targets[group];
                let moved = if current < target {
                    self.pull_master_into(group, &targets)?
                } else if current > target {
                    self.push_master_out_of(group, &targets)?
                } else {
                    false
                };
                if !moved {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Bring one more master into `group` from a surplus neighbour.
    fn pull_master_into(&mut self, group: &str, targets: &BTreeMap<String, usize>) -> Result<bool> {
        // A local replica already attached to a surplus neighbour's
        // master converts with a single failover.
        for (neighbor, target) in targets {
            if neighbor == group || self.masters_in_group(neighbor).len() <= *target {
                continue;
            }
            for replica in self.replicas_in_group(group) {
                let master_group = match self.topology.master_of(&replica) {
                    Ok(master) => master.group(self.topology.mode()).to_string(),
                    Err(_) => continue,
                };
                if master_group == *neighbor {
                    self.failover(&replica)?;
                    return Ok(true);
                }
            }
        }
        // Otherwise reparent any local replica under a surplus
        // neighbour's master and fail it over.
        for (neighbor, target) in targets {
            if neighbor == group || self.masters_in_group(neighbor).len() <= *target {
                continue;
            }
            let donor = self.masters_in_group(neighbor).pop();
            let replica = self.replicas_in_group(group).first().cloned();
            if let (Some(donor), Some(replica)) = (donor, replica) {
                self.replicate(&donor, &replica)?;
                self.failover(&replica)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Move one master of `group` to a neighbour short of its target.
    fn push_master_out_of(
        &mut self,
        group: &str,
        targets: &BTreeMap<String, usize>,
    ) -> Result<bool> {
        for (neighbor, target) in targets {
            if neighbor == group || self.masters_in_group(neighbor).len() >= *target {
                continue;
            }
            for replica in self.replicas_in_group(neighbor) {
                let master_group = match self.topology.master_of(&replica) {
                    Ok(master) => master.group(self.topology.mode()).to_string(),
                    Err(_) => continue,
                };
                if master_group == group {
                    self.failover(&replica)?;
                    return Ok(true);
                }
            }
        }
        for (neighbor, target) in targets {
            if neighbor == group || self.masters_in_group(neighbor).len() >= *target {
                continue;
            }
            let donor = self.masters_in_group(group).pop();
            let replica = self.replicas_in_group(neighbor).first().cloned();
            if let (Some(donor), Some(replica)) = (donor, replica) {
                self.replicate(&donor, &replica)?;
                self.failover(&replica)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Two-level master leveling: allocate masters across datacenters,
    /// then distribute each datacenter's quota over its hosts.
    fn level_out_masters_dc(&mut self) -> Result<()> {
        let max_port = self.settings.max_port;
        let dc_sizes = self.group_sizes();
        if dc_sizes.is_empty() {
            return Ok(());
        }
        let total = self.topology.masters(max_port).len();
        let dc_targets = desired_targets(&dc_sizes, total);

        let mut host_targets: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        for (dc, nodes) in self.topology.groups(max_port) {
            let host_sizes: BTreeMap<String, usize> = {
                let mut sizes = BTreeMap::new();
                for node in nodes {
                    *sizes.entry(node.host.clone()).or_insert(0) += 1;
                }
                sizes
            };
            host_targets.insert(dc.to_string(), desired_targets(&host_sizes, dc_targets[dc]));
        }
        debug!(?host_targets, "leveling masters across datacenters and hosts");

        let layout: Vec<(String, Vec<String>)> = host_targets
            .iter()
            .map(|(dc, hosts)| (dc.clone(), hosts.keys().cloned().collect()))
            .collect();
        for (dc, hosts) in layout {
            for host in hosts {
                loop {
                    let current = self.masters_on_host(&host).len();
                    let target = host_targets[&dc][&host];
                    let moved = if current < target {
                        self.pull_master_onto_host(&dc, &host, &host_targets)?
                    } else if current > target {
                        self.push_master_off_host(&dc, &host, &host_targets)?
                    } else {
                        false
                    };
                    if !moved {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn masters_on_host(&self, host: &str) -> Vec<NodeId> {
        self.topology
            .within(self.settings.max_port)
            .filter(|n| n.host == host && n.is_master())
            .map(|n| n.node_id.clone())
            .collect()
    }

    fn replicas_on_host(&self, host: &str) -> Vec<NodeId> {
        self.topology
            .within(self.settings.max_port)
            .filter(|n| n.host == host && n.is_replica())
            .map(|n| n.node_id.clone())
            .collect()
    }

    fn pull_master_onto_host(
        &mut self,
        dc: &str,
        host: &str,
        host_targets: &BTreeMap<String, BTreeMap<String, usize>>,
    ) -> Result<bool> {
        // Plain failover: a replica on this host whose master sits on a
        // surplus host of a neighbouring datacenter.
        for (neighbor_dc, hosts) in host_targets {
            if neighbor_dc == dc {
                continue;
            }
            for (neighbor_host, target) in hosts {
                if self.masters_on_host(neighbor_host).len() <= *target {
                    continue;
                }
                for replica in self.replicas_on_host(host) {
                    if let Ok(master) = self.topology.master_of(&replica) {
                        if master.host == *neighbor_host {
                            self.failover(&replica)?;
                            return Ok(true);
                        }
                    }
                }
            }
        }
        // Reparent under a surplus neighbour master, then fail over.
        for (neighbor_dc, hosts) in host_targets {
            if neighbor_dc == dc {
                continue;
            }
            for (neighbor_host, target) in hosts {
                let donors = self.masters_on_host(neighbor_host);
                if donors.len() <= *target {
                    continue;
                }
                if let Some(replica) = self.replicas_on_host(host).first().cloned() {
                    let donor = donors.last().expect("non-empty").clone();
                    self.replicate(&donor, &replica)?;
                    self.failover(&replica)?;
                    return Ok(true);
                }
            }
        }
        // Last resort: reshuffle inside the own datacenter.
        if let Some(hosts) = host_targets.get(dc) {
            for (sibling, target) in hosts {
                if sibling == host {
                    continue;
                }
                let donors = self.masters_on_host(sibling);
                if donors.len() <= *target {
                    continue;
                }
                if let Some(replica) = self.replicas_on_host(host).first().cloned() {
                    let donor = donors.last().expect("non-empty").clone();
                    self.replicate(&donor, &replica)?;
                    self.failover(&replica)?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn push_master_off_host(
        &mut self,
        dc: &str,
        host: &str,
        host_targets: &BTreeMap<String, BTreeMap<String, usize>>,
    ) -> Result<bool> {
        for (neighbor_dc, hosts) in host_targets {
            if neighbor_dc == dc {
                continue;
            }
            for (neighbor_host, target) in hosts {
                if self.masters_on_host(neighbor_host).len() >= *target {
                    continue;
                }
                for replica in self.replicas_on_host(neighbor_host) {
                    if let Ok(master) = self.topology.master_of(&replica) {
                        if master.host == host {
                            self.failover(&replica)?;
                            return Ok(true);
                        }
                    }
                }
            }
        }
        for (neighbor_dc, hosts) in host_targets {
            if neighbor_dc == dc {
                continue;
            }
            for (neighbor_host, target) in hosts {
                if self.masters_on_host(neighbor_host).len() >= *target {
                    continue;
                }
                if let Some(replica) = self.replicas_on_host(neighbor_host).first().cloned() {
                    if let Some(donor) = self.masters_on_host(host).last().cloned() {
                        self.replicate(&donor, &replica)?;
                        self.failover(&replica)?;
                        return Ok(true);
                    }
                }
            }
        }
        if let Some(hosts) = host_targets.get(dc) {
            for (sibling, target) in hosts {
                if sibling == host || self.masters_on_host(sibling).len() >= *target {
                    continue;
                }
                if let Some(replica) = self.replicas_on_host(sibling).first().cloned() {
                    if let Some(donor) = self.masters_on_host(host).last().cloned() {
                        self.replicate(&donor, &replica)?;
                        self.failover(&replica)?;
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Give every shard `replicas` copies in distinct fault domains.
    ///
    /// Shards already satisfying the spread are set aside; the rest form
    /// a working set whose replicas are traded and reattached. When the
    /// working set cannot produce enough distinct groups for a master,
    /// soft swaps with healthy shards are tried first, then whole shards
    /// are pulled into the working set. Running out of options fails the
    /// planning run naming the master.
    pub(crate) fn level_out_replicas(&mut self) -> Result<()> {
        let replicas = self.settings.replicas;
        let max_port = self.settings.max_port;
        let mode = self.topology.mode();

        // Phase 1: reduce the working set to misplaced shards.
        let mut removed: BTreeSet<NodeId> = BTreeSet::new();
        let master_ids: Vec<NodeId> = self
            .topology
            .masters(max_port)
            .iter()
            .map(|n| n.node_id.clone())
            .collect();
        for master_id in &master_ids {
            let master = self.topology.require(master_id)?;
            let master_group = master.group(mode).to_string();
            let shard_replicas = self.topology.replicas_of(master_id, MAX_PORT);
            let mut members: Vec<&Node> = vec![master];
            members.extend(shard_replicas.iter().copied());
            let spread = partition_by_group(
                members.iter().copied().filter(|n| n.port <= max_port),
                mode,
            )
            .len();

            if shard_replicas.len() == replicas && spread == replicas + 1 {
                removed.insert(master_id.clone());
                removed.extend(shard_replicas.iter().map(|n| n.node_id.clone()));
            } else if shard_replicas.len() > replicas && spread == replicas + 1 {
                // Overprovisioned but well spread: keep one surplus
                // replica per foreign group in the working set and
                // retire the rest of the shard from consideration.
                let by_group = partition_by_group(
                    shard_replicas.iter().copied().filter(|n| n.port <= max_port),
                    mode,
                );
                for (group, group_replicas) in by_group {
                    if group != master_group {
                        if let Some(last) = group_replicas.last() {
                            removed.insert(last.node_id.clone());
                        }
                    }
                }
                removed.insert(master_id.clone());
            }
        }

        let mut workset: Vec<NodeId> = self
            .topology
            .nodes()
            .iter()
            .filter(|n| !removed.contains(&n.node_id))
            .map(|n| n.node_id.clone())
            .collect();

        // Phase 2: cover each remaining master from the working set.
        let mut ws_masters: Vec<NodeId> = workset
            .iter()
            .filter(|id| {
                self.topology
                    .get(id)
                    .is_some_and(|n| n.is_master() && n.port <= max_port)
            })
            .cloned()
            .collect();

        let mut index = 0;
        while index < ws_masters.len() {
            let master_id = ws_masters[index].clone();
            let master_group = self.topology.group_of(&master_id)?.to_string();

            let mut covered = self.workset_replica_groups(&workset, &master_group);
            if covered.len() < replicas {
                self.soft_swap_replicas(&master_id, &master_group, &mut workset, &ws_masters)?;
                covered = self.workset_replica_groups(&workset, &master_group);
            }
            if covered.len() < replicas {
                // Escalate: pull whole foreign shards into the working
                // set until enough groups appear or none are left.
                loop {
                    let known: BTreeSet<&NodeId> = ws_masters.iter().collect();
                    let extra = self
                        .topology
                        .masters(max_port)
                        .iter()
                        .find(|m| !known.contains(&m.node_id))
                        .map(|m| m.node_id.clone());
                    let Some(extra) = extra else { break };
                    drop(known);
                    let mut additions = vec![extra.clone()];
                    additions.extend(
                        self.topology
                            .replicas_of(&extra, MAX_PORT)
                            .iter()
                            .map(|n| n.node_id.clone()),
                    );
                    for id in additions {
                        if !workset.contains(&id) {
                            workset.push(id);
                        }
                    }
                    ws_masters.push(extra);
                    covered = self.workset_replica_groups(&workset, &master_group);
                    if covered.len() >= replicas {
                        break;
                    }
                }
            }
            if covered.len() < replicas {
                let master = self.topology.require(&master_id)?;
                return Err(Error::ReplicaGroupsUnsatisfiable {
                    master: master_id.clone(),
                    endpoint: master.endpoint(),
                    group: master_group,
                    required: replicas,
                });
            }

            let chosen: Vec<String> = covered.keys().take(replicas).cloned().collect();
            for group in chosen {
                let fresh = self.workset_replica_groups(&workset, &master_group);
                let replica = fresh[&group][0].clone();
                self.replicate(&master_id, &replica)?;
                workset.retain(|id| id != &replica);
            }
            index += 1;
        }
        Ok(())
    }

    /// Replicas of the working set partitioned by group, the master's own
    /// group excluded.
    fn workset_replica_groups(
        &self,
        workset: &[NodeId],
        exclude_group: &str,
    ) -> BTreeMap<String, Vec<NodeId>> {
        let ids: BTreeSet<&NodeId> = workset.iter().collect();
        let mut map: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
        for node in self.topology.within(self.settings.max_port) {
            if !node.is_replica() || !ids.contains(&node.node_id) {
                continue;
            }
            let group = node.group(self.topology.mode());
            if group == exclude_group {
                continue;
            }
            map.entry(group.to_string())
                .or_default()
                .push(node.node_id.clone());
        }
        map
    }

    /// Trade replicas with healthy shards outside the working set when
    /// both sides end up with a group they were missing.
    fn soft_swap_replicas(
        &mut self,
        master_id: &NodeId,
        master_group: &str,
        workset: &mut Vec<NodeId>,
        ws_masters: &[NodeId],
    ) -> Result<()> {
        let replicas = self.settings.replicas;
        let max_port = self.settings.max_port;
        let mode = self.topology.mode();
        let ws_master_set: BTreeSet<&NodeId> = ws_masters.iter().collect();

        let neighbor_masters: Vec<NodeId> = self
            .topology
            .masters(max_port)
            .iter()
            .filter(|m| !ws_master_set.contains(&m.node_id) && m.group(mode) != master_group)
            .map(|m| m.node_id.clone())
            .collect();

        'neighbors: for neighbor in neighbor_masters {
            let neighbor_group = self.topology.group_of(&neighbor)?.to_string();
            let mut ws_groups = self.workset_replica_groups(workset, master_group);
            if ws_groups.len() >= replicas {
                break;
            }

            let ws_replica_ids: BTreeSet<NodeId> = workset
                .iter()
                .filter(|id| self.topology.get(id).is_some_and(Node::is_replica))
                .cloned()
                .collect();
            let mut neighbor_replica_groups: BTreeMap<String, Vec<NodeId>> = BTreeMap::new();
            for replica in self.topology.replicas_of(&neighbor, max_port) {
                if ws_replica_ids.contains(&replica.node_id) {
                    continue;
                }
                let group = replica.group(mode);
                if group == master_group {
                    continue;
                }
                neighbor_replica_groups
                    .entry(group.to_string())
                    .or_default()
                    .push(replica.node_id.clone());
            }

            let ours: BTreeSet<&String> = ws_groups.keys().collect();
            let theirs: BTreeSet<&String> = neighbor_replica_groups.keys().collect();
            let diff: BTreeSet<String> = ours
                .symmetric_difference(&theirs)
                .map(|group| (*group).clone())
                .collect();
            if diff.is_empty() {
                continue;
            }

            for (their_group, their_replicas) in &neighbor_replica_groups {
                if !diff.contains(their_group)
                    || ws_groups.contains_key(their_group)
                    || their_group == master_group
                {
                    continue;
                }
                // Pick what we hand back: a working-set replica whose
                // group the neighbour shard is missing.
                let give = ws_groups
                    .iter()
                    .filter(|(group, _)| {
                        diff.contains(*group)
                            && *group != &neighbor_group
                            && !neighbor_replica_groups.contains_key(*group)
                    })
                    .flat_map(|(_, ids)| ids.iter())
                    .next()
                    .cloned();
                let Some(give) = give else { continue };
                let take = their_replicas[0].clone();

                self.replicate(master_id, &take)?;
                self.replicate(&neighbor, &give)?;
                if let Some(position) = workset.iter().position(|id| id == &give) {
                    workset[position] = take;
                }
                ws_groups = self.workset_replica_groups(workset, master_group);
                if ws_groups.len() >= replicas {
                    break 'neighbors;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::CommandKind;
    use shardpilot_common::config::PlannerSettings;
    use shardpilot_topology::checks;
    use shardpilot_topology::test_support::{dc_topology, topology};

    fn settings(replicas: usize) -> PlannerSettings {
        PlannerSettings {
            replicas,
            ..PlannerSettings::default()
        }
    }

    #[test]
    fn targets_floor_with_remainder_first() {
        let sizes: BTreeMap<String, usize> =
            [("a", 4), ("b", 4), ("c", 4)].map(|(k, v)| (k.to_string(), v)).into();
        let targets = desired_targets(&sizes, 7);
        assert_eq!(targets["a"], 3);
        assert_eq!(targets["b"], 2);
        assert_eq!(targets["c"], 2);
    }

    #[test]
    fn targets_clamp_to_capacity_and_redistribute() {
        let sizes: BTreeMap<String, usize> =
            [("a", 1), ("b", 4), ("c", 4)].map(|(k, v)| (k.to_string(), v)).into();
        let targets = desired_targets(&sizes, 8);
        assert_eq!(targets["a"], 1);
        assert_eq!(targets["b"] + targets["c"], 7);
        assert!(targets["b"] <= 4 && targets["c"] <= 4);
    }

    #[test]
    fn masters_level_out_with_plain_failovers_when_possible() {
        // Masters 4/1/1 over three equally sized hosts; target is 2/2/2.
        // Each underfull host owns a replica of a surplus-host master, so
        // exactly two failovers suffice.
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.1", 7001, None),
                ("m3", "10.0.0.1", 7002, None),
                ("m4", "10.0.0.1", 7003, None),
                ("m5", "10.0.0.2", 7000, None),
                ("s1", "10.0.0.2", 7001, Some("m1")),
                ("s2", "10.0.0.2", 7002, Some("m3")),
                ("s3", "10.0.0.2", 7003, Some("m4")),
                ("m6", "10.0.0.3", 7000, None),
                ("s4", "10.0.0.3", 7001, Some("m2")),
                ("s5", "10.0.0.3", 7002, Some("m3")),
                ("s6", "10.0.0.3", 7003, Some("m4")),
            ],
        );
        let mut planner = Planner::new(topo, settings(1));
        planner.level_out_masters().unwrap();

        let commands = planner.plan().commands();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|c| c.kind == CommandKind::Failover));
        // No replica is failed over twice.
        assert_ne!(commands[0].run_on, commands[1].run_on);

        let shares = checks::group_master_shares(planner.topology(), MAX_PORT);
        assert!(shares.values().all(|pct| (*pct - 33.33).abs() < 0.5));
    }

    #[test]
    fn master_leveling_escalates_to_replicate_then_failover() {
        // The underfull host's replicas all point at the other underfull
        // host's master, so a plain failover cannot help; the planner
        // must reparent first.
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.1", 7001, None),
                ("m3", "10.0.0.2", 7000, None),
                ("s1", "10.0.0.3", 7000, Some("m3")),
                ("s2", "10.0.0.3", 7001, Some("m3")),
            ],
        );
        let mut planner = Planner::new(topo, settings(1));
        planner.level_out_masters().unwrap();

        let kinds: Vec<CommandKind> = planner.plan().commands().iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CommandKind::Replicate, CommandKind::Failover]);
        let shares = checks::group_master_shares(planner.topology(), MAX_PORT);
        let spread = shares.values().cloned().fold(f64::NEG_INFINITY, f64::max)
            - shares.values().cloned().fold(f64::INFINITY, f64::min);
        assert!(spread < 34.0);
    }

    #[test]
    fn replicas_spread_across_missing_groups() {
        // m1 has both replicas in dc2; after leveling its shard must span
        // two foreign datacenters, fed by m3's surplus copy in dc3.
        let topo = dc_topology(&[
            ("m1", "10.0.0.1", 7000, None, "dc1"),
            ("s1", "10.0.0.2", 7000, Some("m1"), "dc2"),
            ("s2", "10.0.0.2", 7001, Some("m1"), "dc2"),
            ("m2", "10.0.0.2", 7002, None, "dc2"),
            ("s3", "10.0.0.1", 7001, Some("m2"), "dc1"),
            ("s4", "10.0.0.3", 7000, Some("m2"), "dc3"),
            ("m3", "10.0.0.3", 7001, None, "dc3"),
            ("s5", "10.0.0.1", 7002, Some("m3"), "dc1"),
            ("s6", "10.0.0.2", 7003, Some("m3"), "dc2"),
            ("s7", "10.0.0.3", 7002, Some("m3"), "dc3"),
        ]);
        let mut planner = Planner::new(topo, settings(2));
        planner.level_out_replicas().unwrap();

        let topo = planner.topology();
        for master in topo.masters(MAX_PORT) {
            let groups =
                partition_by_group(topo.replicas_of(&master.node_id, MAX_PORT), topo.mode());
            assert!(
                groups.len() >= 2,
                "master {} covers only {:?}",
                master.node_id,
                groups.keys().collect::<Vec<_>>()
            );
            assert!(!groups.contains_key(master.group(topo.mode())));
        }
    }

    #[test]
    fn clean_layout_produces_no_commands() {
        let topo = dc_topology(&[
            ("m1", "10.0.0.1", 7000, None, "dc1"),
            ("s1", "10.0.0.2", 7000, Some("m1"), "dc2"),
            ("s2", "10.0.0.3", 7000, Some("m1"), "dc3"),
            ("m2", "10.0.0.2", 7001, None, "dc2"),
            ("s3", "10.0.0.1", 7001, Some("m2"), "dc1"),
            ("s4", "10.0.0.3", 7001, Some("m2"), "dc3"),
            ("m3", "10.0.0.3", 7002, None, "dc3"),
            ("s5", "10.0.0.1", 7002, Some("m3"), "dc1"),
            ("s6", "10.0.0.2", 7002, Some("m3"), "dc2"),
        ]);
        let mut planner = Planner::new(topo, settings(2));
        planner.level_out_masters().unwrap();
        planner.level_out_replicas().unwrap();
        assert!(planner.plan().is_empty());
    }

    #[test]
    fn unsatisfiable_spread_names_the_master() {
        // Two groups only, R=2: no amount of trading produces two
        // distinct foreign groups.
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("s1", "10.0.0.2", 7000, Some("m1")),
                ("s2", "10.0.0.2", 7001, Some("m1")),
            ],
        );
        let mut planner = Planner::new(topo, settings(2));
        let err = planner.level_out_replicas().unwrap_err();
        match err {
            Error::ReplicaGroupsUnsatisfiable { master, required, .. } => {
                assert_eq!(master, "m1".into());
                assert_eq!(required, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

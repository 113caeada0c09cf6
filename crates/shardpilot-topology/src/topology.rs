//! Topology model: an ordered node list with fault-domain partitionings.
//!
//! All accessors preserve the `(host, port)` ordering established at
//! construction time, so "first candidate" choices made over them are
//! deterministic. The only mutations are the two planning primitives,
//! [`Topology::apply_replicate`] and [`Topology::apply_failover`]; every
//! other operation is a pure read.

use crate::node::{GroupingMode, Node, NodeFlag};
use shardpilot_common::{Error, NodeId, Result};
use std::collections::{BTreeMap, BTreeSet};

/// An immutable-by-convention snapshot of the cluster membership.
#[derive(Clone, Debug, PartialEq)]
pub struct Topology {
    nodes: Vec<Node>,
    mode: GroupingMode,
}

impl Topology {
    /// Build a topology from a node list, establishing the canonical
    /// `(host, port)` ordering.
    #[must_use]
    pub fn from_nodes(mut nodes: Vec<Node>, mode: GroupingMode) -> Self {
        nodes.sort_by(|a, b| (a.host.as_str(), a.port).cmp(&(b.host.as_str(), b.port)));
        Self { nodes, mode }
    }

    #[must_use]
    pub fn mode(&self) -> GroupingMode {
        self.mode
    }

    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drop nodes carrying the `noaddr` flag.
    #[must_use]
    pub fn without_noaddr(mut self) -> Self {
        self.nodes.retain(|n| !n.has_flag(NodeFlag::Noaddr));
        self
    }

    /// Keep only nodes whose cluster bus link is up.
    #[must_use]
    pub fn only_connected(mut self) -> Self {
        self.nodes.retain(|n| n.connected);
        self
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.node_id == id)
    }

    pub fn require(&self, id: &NodeId) -> Result<&Node> {
        self.get(id).ok_or_else(|| Error::NodeNotFound(id.clone()))
    }

    fn index_of(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| &n.node_id == id)
    }

    /// Nodes with `port <= max_port`, in canonical order.
    pub fn within(&self, max_port: u16) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.port <= max_port)
    }

    /// All masters with `port <= max_port`.
    #[must_use]
    pub fn masters(&self, max_port: u16) -> Vec<&Node> {
        self.within(max_port).filter(|n| n.is_master()).collect()
    }

    /// All replicas with `port <= max_port`.
    #[must_use]
    pub fn replicas(&self, max_port: u16) -> Vec<&Node> {
        self.within(max_port).filter(|n| n.is_replica()).collect()
    }

    /// Replicas attached to the given master, `port <= max_port`.
    #[must_use]
    pub fn replicas_of(&self, master_id: &NodeId, max_port: u16) -> Vec<&Node> {
        self.within(max_port)
            .filter(|n| n.master_id.as_ref() == Some(master_id))
            .collect()
    }

    /// The node a replica reports as its master.
    ///
    /// Fails when the id does not name a replica or the reference dangles.
    /// The referenced node is returned as-is; it may itself be flagged
    /// `slave` (that is exactly the slave-of-slave defect).
    pub fn master_of(&self, replica_id: &NodeId) -> Result<&Node> {
        let replica = self.require(replica_id)?;
        if !replica.is_replica() {
            return Err(Error::NotAReplica(replica_id.clone()));
        }
        let master_id = replica.master_id.as_ref().ok_or_else(|| {
            Error::invalid_plan_step(format!("replica {replica_id} has no master reference"))
        })?;
        self.get(master_id)
            .ok_or_else(|| Error::OrphanReplica(replica_id.clone(), master_id.clone()))
    }

    /// Fault-domain partitioning: group tag to nodes, `port <= max_port`.
    #[must_use]
    pub fn groups(&self, max_port: u16) -> BTreeMap<&str, Vec<&Node>> {
        partition_by_group(self.within(max_port), self.mode)
    }

    /// Host partitioning used inside datacenters.
    #[must_use]
    pub fn subgroups(&self, max_port: u16) -> BTreeMap<&str, Vec<&Node>> {
        let mut map: BTreeMap<&str, Vec<&Node>> = BTreeMap::new();
        for node in self.within(max_port) {
            map.entry(node.subgroup()).or_default().push(node);
        }
        map
    }

    /// Group tag of a node identified by id.
    pub fn group_of(&self, id: &NodeId) -> Result<&str> {
        Ok(self.require(id)?.group(self.mode))
    }

    /// Distinct server addresses, sorted, `port <= max_port`.
    #[must_use]
    pub fn server_ips(&self, max_port: u16) -> Vec<&str> {
        let set: BTreeSet<&str> = self.within(max_port).map(|n| n.host.as_str()).collect();
        set.into_iter().collect()
    }

    #[must_use]
    pub fn max_port(&self) -> Option<u16> {
        self.nodes.iter().map(|n| n.port).max()
    }

    #[must_use]
    pub fn min_port(&self) -> Option<u16> {
        self.nodes.iter().map(|n| n.port).min()
    }

    /// Replica count currently realised by the cluster, `⌊replicas/masters⌋`.
    pub fn inferred_replicas(&self, max_port: u16) -> Result<usize> {
        let masters = self.masters(max_port).len();
        if masters == 0 {
            return Err(Error::NoMasters);
        }
        Ok(self.replicas(max_port).len() / masters)
    }

    /// Replica count per master, in master `(host, port)` order.
    ///
    /// Masters are enumerated unrestricted; only the replica side honours
    /// `max_port`, mirroring how port reduction hides retiring instances
    /// from selection but not from ownership.
    #[must_use]
    pub fn replica_counts(&self, max_port: u16) -> Vec<(NodeId, usize)> {
        self.masters(shardpilot_common::config::MAX_PORT)
            .iter()
            .map(|m| {
                (
                    m.node_id.clone(),
                    self.replicas_of(&m.node_id, max_port).len(),
                )
            })
            .collect()
    }

    /// Reparent a replica to a new master.
    ///
    /// This is the model-level effect of `CLUSTER REPLICATE`.
    pub fn apply_replicate(&mut self, master_id: &NodeId, replica_id: &NodeId) -> Result<()> {
        if master_id == replica_id {
            return Err(Error::invalid_plan_step(format!(
                "cannot replicate {replica_id} from itself"
            )));
        }
        if !self.require(master_id)?.is_master() {
            return Err(Error::NotAMaster(master_id.clone()));
        }
        let ridx = self
            .index_of(replica_id)
            .ok_or_else(|| Error::NodeNotFound(replica_id.clone()))?;
        if !self.nodes[ridx].is_replica() {
            return Err(Error::NotAReplica(replica_id.clone()));
        }
        self.nodes[ridx].master_id = Some(master_id.clone());
        Ok(())
    }

    /// Promote a replica over its master.
    ///
    /// This is the model-level effect of `CLUSTER FAILOVER` run on the
    /// replica: slots and role flags swap between the pair, the demoted
    /// master and every sibling replica are pointed at the new master.
    /// Returns the id of the demoted master.
    pub fn apply_failover(&mut self, replica_id: &NodeId) -> Result<NodeId> {
        let ridx = self
            .index_of(replica_id)
            .ok_or_else(|| Error::NodeNotFound(replica_id.clone()))?;
        if !self.nodes[ridx].is_replica() {
            return Err(Error::NotAReplica(replica_id.clone()));
        }
        let master_id = self.nodes[ridx].master_id.clone().ok_or_else(|| {
            Error::invalid_plan_step(format!("replica {replica_id} has no master reference"))
        })?;
        let midx = self
            .index_of(&master_id)
            .ok_or_else(|| Error::OrphanReplica(replica_id.clone(), master_id.clone()))?;

        let siblings: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, n)| {
                *i != ridx && *i != midx && n.master_id.as_ref() == Some(&master_id)
            })
            .map(|(i, _)| i)
            .collect();

        let slots = std::mem::take(&mut self.nodes[midx].slots);
        self.nodes[midx].slots = std::mem::replace(&mut self.nodes[ridx].slots, slots);

        let inherited = self.nodes[midx].master_id.take();
        self.nodes[midx].master_id = Some(replica_id.clone());
        self.nodes[ridx].master_id = inherited;

        self.nodes[midx].flags = [NodeFlag::Slave].into_iter().collect();
        self.nodes[ridx].flags = [NodeFlag::Master].into_iter().collect();

        for idx in siblings {
            self.nodes[idx].master_id = Some(replica_id.clone());
        }
        Ok(master_id)
    }
}

/// Partition an arbitrary node selection by group tag.
#[must_use]
pub fn partition_by_group<'a>(
    nodes: impl IntoIterator<Item = &'a Node>,
    mode: GroupingMode,
) -> BTreeMap<&'a str, Vec<&'a Node>> {
    let mut map: BTreeMap<&str, Vec<&Node>> = BTreeMap::new();
    for node in nodes {
        map.entry(node.group(mode)).or_default().push(node);
    }
    map
}

/// Distinct hosts of a node selection, sorted.
#[must_use]
pub fn hosts_of<'a>(nodes: &[&'a Node]) -> Vec<&'a str> {
    let set: BTreeSet<&str> = nodes.iter().map(|n| n.host.as_str()).collect();
    set.into_iter().collect()
}

/// Nodes of a selection living on one host, selection order preserved.
#[must_use]
pub fn by_host<'a>(nodes: &[&'a Node], host: &str) -> Vec<&'a Node> {
    nodes.iter().copied().filter(|n| n.host == host).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{replica, topology};
    use shardpilot_common::config::MAX_PORT;

    #[test]
    fn nodes_are_ordered_by_host_and_port() {
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m2", "10.0.0.2", 7001, None),
                ("m1", "10.0.0.1", 7002, None),
                ("s1", "10.0.0.1", 7001, Some("m1")),
            ],
        );
        let order: Vec<(&str, u16)> = topo
            .nodes()
            .iter()
            .map(|n| (n.host.as_str(), n.port))
            .collect();
        assert_eq!(
            order,
            vec![("10.0.0.1", 7001), ("10.0.0.1", 7002), ("10.0.0.2", 7001)]
        );
    }

    #[test]
    fn role_filters_and_port_restriction() {
        let topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.2", 7220, None),
                ("s1", "10.0.0.3", 7000, Some("m1")),
            ],
        );
        assert_eq!(topo.masters(MAX_PORT).len(), 2);
        assert_eq!(topo.masters(7210).len(), 1);
        assert_eq!(topo.replicas_of(&"m1".into(), MAX_PORT).len(), 1);
    }

    #[test]
    fn master_of_rejects_masters() {
        let topo = topology(
            GroupingMode::Host,
            &[("m1", "10.0.0.1", 7000, None), ("s1", "10.0.0.2", 7000, Some("m1"))],
        );
        assert!(topo.master_of(&"s1".into()).is_ok());
        assert!(matches!(
            topo.master_of(&"m1".into()),
            Err(Error::NotAReplica(_))
        ));
    }

    #[test]
    fn groups_follow_mode() {
        let mut nodes = vec![
            replica("s1", "10.0.0.1", 7001, "m1"),
            replica("s2", "10.0.0.2", 7001, "m1"),
        ];
        nodes[0].datacenter = Some("dc1".to_string());
        nodes[1].datacenter = Some("dc1".to_string());
        let topo = Topology::from_nodes(nodes.clone(), GroupingMode::Datacenter);
        assert_eq!(topo.groups(MAX_PORT).len(), 1);
        assert_eq!(topo.subgroups(MAX_PORT).len(), 2);

        let topo = Topology::from_nodes(nodes, GroupingMode::Host);
        assert_eq!(topo.groups(MAX_PORT).len(), 2);
    }

    #[test]
    fn replicate_reparents_and_validates_roles() {
        let mut topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.2", 7000, None),
                ("s1", "10.0.0.3", 7000, Some("m1")),
            ],
        );
        topo.apply_replicate(&"m2".into(), &"s1".into()).unwrap();
        assert_eq!(topo.get(&"s1".into()).unwrap().master_id, Some("m2".into()));

        assert!(matches!(
            topo.apply_replicate(&"s1".into(), &"m1".into()),
            Err(Error::NotAMaster(_))
        ));
        assert!(matches!(
            topo.apply_replicate(&"m2".into(), &"m2".into()),
            Err(Error::InvalidPlanStep(_))
        ));
    }

    #[test]
    fn failover_swaps_roles_slots_and_siblings() {
        let mut topo = topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("s1", "10.0.0.2", 7000, Some("m1")),
                ("s2", "10.0.0.3", 7000, Some("m1")),
            ],
        );
        let old = topo.apply_failover(&"s1".into()).unwrap();
        assert_eq!(old, "m1".into());

        let promoted = topo.get(&"s1".into()).unwrap();
        assert!(promoted.is_master());
        assert!(promoted.has_slots());
        assert_eq!(promoted.master_id, None);

        let demoted = topo.get(&"m1".into()).unwrap();
        assert!(demoted.is_replica());
        assert!(!demoted.has_slots());
        assert_eq!(demoted.master_id, Some("s1".into()));

        let sibling = topo.get(&"s2".into()).unwrap();
        assert_eq!(sibling.master_id, Some("s1".into()));
    }
}

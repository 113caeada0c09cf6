//! Test fixtures shared by the workspace's test suites.
//!
//! Compact builders for hand-written cluster layouts; not part of the
//! operational API.

use crate::node::{GroupingMode, Node, NodeFlag};
use crate::topology::Topology;
use shardpilot_common::NodeId;

/// A master node owning one slot range.
#[must_use]
pub fn master(id: &str, host: &str, port: u16) -> Node {
    Node {
        node_id: NodeId::new(id),
        host: host.to_string(),
        port,
        flags: [NodeFlag::Master].into_iter().collect(),
        master_id: None,
        ping_sent: 0,
        pong_recv: 0,
        config_epoch: 1,
        connected: true,
        slots: vec!["0-16383".to_string()],
        datacenter: None,
        hostname: None,
    }
}

/// A replica of the given master.
#[must_use]
pub fn replica(id: &str, host: &str, port: u16, master_id: &str) -> Node {
    Node {
        node_id: NodeId::new(id),
        host: host.to_string(),
        port,
        flags: [NodeFlag::Slave].into_iter().collect(),
        master_id: Some(NodeId::new(master_id)),
        ping_sent: 0,
        pong_recv: 0,
        config_epoch: 1,
        connected: true,
        slots: Vec::new(),
        datacenter: None,
        hostname: None,
    }
}

/// Build a topology from `(id, host, port, master)` tuples; `None` for the
/// master column makes the node a master.
#[must_use]
pub fn topology(mode: GroupingMode, specs: &[(&str, &str, u16, Option<&str>)]) -> Topology {
    let nodes = specs
        .iter()
        .map(|(id, host, port, master_of)| match master_of {
            Some(mid) => replica(id, host, *port, mid),
            None => master(id, host, *port),
        })
        .collect();
    Topology::from_nodes(nodes, mode)
}

/// Build a datacenter-tagged topology from `(id, host, port, master, dc)`
/// tuples.
#[must_use]
pub fn dc_topology(specs: &[(&str, &str, u16, Option<&str>, &str)]) -> Topology {
    let nodes = specs
        .iter()
        .map(|(id, host, port, master_of, dc)| {
            let mut node = match master_of {
                Some(mid) => replica(id, host, *port, mid),
                None => master(id, host, *port),
            };
            node.datacenter = Some((*dc).to_string());
            node.hostname = Some(format!("{host}.example.net"));
            node
        })
        .collect();
    Topology::from_nodes(nodes, GroupingMode::Datacenter)
}

//! Cluster node representation.

use serde::{Deserialize, Serialize};
use shardpilot_common::{Endpoint, NodeId};
use std::collections::BTreeSet;

/// A single flag from the CLUSTER NODES flag list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeFlag {
    Myself,
    Master,
    Slave,
    Fail,
    /// Possible failure, not yet agreed on by the cluster (`fail?`).
    PFail,
    Handshake,
    Noaddr,
    Nofailover,
    Noflags,
}

impl NodeFlag {
    /// Parse one flag token as printed by CLUSTER NODES.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "myself" => Some(Self::Myself),
            "master" => Some(Self::Master),
            "slave" => Some(Self::Slave),
            "fail" => Some(Self::Fail),
            "fail?" => Some(Self::PFail),
            "handshake" => Some(Self::Handshake),
            "noaddr" => Some(Self::Noaddr),
            "nofailover" => Some(Self::Nofailover),
            "noflags" => Some(Self::Noflags),
            _ => None,
        }
    }
}

/// How nodes are partitioned into fault domains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupingMode {
    /// One group per host address. Used when no inventory is available.
    Host,
    /// One group per datacenter, with hosts as subgroups.
    Datacenter,
}

/// A cluster member as reported by CLUSTER NODES, optionally enriched
/// with inventory data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
    pub flags: BTreeSet<NodeFlag>,
    /// Id of this replica's master; `None` on masters.
    pub master_id: Option<NodeId>,
    pub ping_sent: u64,
    pub pong_recv: u64,
    pub config_epoch: u64,
    /// Link state of the cluster bus connection.
    pub connected: bool,
    /// Owned slot descriptors, kept opaque. The planner only asks whether
    /// the set is empty.
    pub slots: Vec<String>,
    /// Datacenter tag from the inventory; absent in host-grouping mode or
    /// when the lookup failed for this address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    /// Hostname from the inventory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Node {
    #[must_use]
    pub fn has_flag(&self, flag: NodeFlag) -> bool {
        self.flags.contains(&flag)
    }

    #[must_use]
    pub fn is_master(&self) -> bool {
        self.has_flag(NodeFlag::Master)
    }

    #[must_use]
    pub fn is_replica(&self) -> bool {
        self.has_flag(NodeFlag::Slave)
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.has_flag(NodeFlag::Fail)
    }

    #[must_use]
    pub fn has_slots(&self) -> bool {
        !self.slots.is_empty()
    }

    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Fault-domain tag of this node under the given grouping mode.
    ///
    /// A node without a datacenter tag falls back to its host even in
    /// datacenter mode, so a failed inventory lookup degrades that node
    /// to host grouping instead of poisoning the whole run.
    #[must_use]
    pub fn group(&self, mode: GroupingMode) -> &str {
        match mode {
            GroupingMode::Host => &self.host,
            GroupingMode::Datacenter => self.datacenter.as_deref().unwrap_or(&self.host),
        }
    }

    /// Subgroup tag: the host within a datacenter.
    #[must_use]
    pub fn subgroup(&self) -> &str {
        &self.host
    }

    /// Human-oriented label used in plan messages and defect reports.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}:{}", self.node_id, self.host, self.port)
    }
}

//! Cluster membership snapshots over the Redis protocol.

use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use shardpilot_common::{Error, Result};
use shardpilot_topology::{enrich, parse_cluster_nodes, GroupingMode, Inventory, Node, Topology};
use tracing::info;

pub(crate) fn connection_info(host: &str, port: u16, password: Option<&str>) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Tcp(host.to_string(), port),
        redis: RedisConnectionInfo {
            db: 0,
            username: None,
            password: password.map(str::to_string),
        },
    }
}

pub(crate) fn transport_err(err: redis::RedisError) -> Error {
    Error::transport(err.to_string())
}

/// Entry point to one cluster, addressed through a single seed node.
///
/// `CLUSTER NODES` returns the full membership from any member, so one
/// connection suffices for snapshotting.
pub struct ClusterClient {
    host: String,
    port: u16,
    password: Option<String>,
}

impl ClusterClient {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, password: Option<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password,
        }
    }

    async fn raw_cluster_nodes(&self) -> Result<String> {
        let client = redis::Client::open(connection_info(
            &self.host,
            self.port,
            self.password.as_deref(),
        ))
        .map_err(transport_err)?;
        let mut conn = client.get_async_connection().await.map_err(transport_err)?;
        redis::cmd("CLUSTER")
            .arg("NODES")
            .query_async::<_, String>(&mut conn)
            .await
            .map_err(transport_err)
    }

    /// Fetch and parse the raw membership.
    pub async fn fetch_nodes(&self) -> Result<Vec<Node>> {
        let raw = self.raw_cluster_nodes().await?;
        let nodes = parse_cluster_nodes(&raw)?;
        info!(seed = %format!("{}:{}", self.host, self.port), nodes = nodes.len(), "fetched cluster membership");
        Ok(nodes)
    }

    /// Fetch a planning-ready topology.
    ///
    /// With an inventory the snapshot is enriched and grouped by
    /// datacenter; without one it is grouped by host. Nodes flagged
    /// `noaddr` are always dropped; disconnected nodes only when
    /// `alive_only` is set.
    pub async fn fetch_topology(
        &self,
        inventory: Option<&dyn Inventory>,
        strict_inventory: bool,
        alive_only: bool,
    ) -> Result<Topology> {
        let mut nodes = self.fetch_nodes().await?;
        let mode = match inventory {
            Some(inventory) => {
                enrich(&mut nodes, inventory, strict_inventory)?;
                GroupingMode::Datacenter
            }
            None => GroupingMode::Host,
        };
        let topology = Topology::from_nodes(nodes, mode).without_noaddr();
        Ok(if alive_only {
            topology.only_connected()
        } else {
            topology
        })
    }
}

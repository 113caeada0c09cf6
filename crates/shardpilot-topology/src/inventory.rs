//! Inventory lookup: mapping server addresses to datacenter and hostname.
//!
//! The planner never talks to an inventory service itself; it consumes a
//! topology whose nodes were enriched once, at snapshot time. The lookup
//! is a capability so deployments can plug in their own source.

use crate::node::Node;
use serde::Deserialize;
use shardpilot_common::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// Inventory answer for one server address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IpInfo {
    pub ip: String,
    pub datacenter: String,
    pub hostname: String,
}

/// Address-to-location lookup. Must be safe for sequential queries; it is
/// consulted once per distinct address during snapshot enrichment.
pub trait Inventory {
    fn lookup(&self, ip: &str) -> Result<IpInfo>;
}

/// The degenerate inventory behind host-grouping mode: every address is
/// its own datacenter.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostInventory;

impl Inventory for HostInventory {
    fn lookup(&self, ip: &str) -> Result<IpInfo> {
        Ok(IpInfo {
            ip: ip.to_string(),
            datacenter: ip.to_string(),
            hostname: ip.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StaticEntry {
    datacenter: String,
    hostname: Option<String>,
}

/// File-backed inventory: a JSON object mapping address to
/// `{"datacenter": ..., "hostname": ...}`.
#[derive(Debug)]
pub struct StaticInventory {
    entries: BTreeMap<String, StaticEntry>,
}

impl StaticInventory {
    pub fn from_path(path: &Path) -> Result<Self> {
        let payload = std::fs::read_to_string(path)?;
        let entries: BTreeMap<String, StaticEntry> = serde_json::from_str(&payload)
            .map_err(|e| Error::configuration(format!("invalid inventory file: {e}")))?;
        Ok(Self { entries })
    }
}

impl Inventory for StaticInventory {
    fn lookup(&self, ip: &str) -> Result<IpInfo> {
        let entry = self.entries.get(ip).ok_or_else(|| Error::Inventory {
            ip: ip.to_string(),
            reason: "address not present in inventory file".to_string(),
        })?;
        Ok(IpInfo {
            ip: ip.to_string(),
            datacenter: entry.datacenter.clone(),
            hostname: entry.hostname.clone().unwrap_or_else(|| ip.to_string()),
        })
    }
}

/// Stamp datacenter and hostname onto a node list.
///
/// Each distinct address is looked up once. When `strict` is set a failed
/// lookup aborts the run; otherwise the node keeps an unset datacenter
/// and degrades to host grouping.
pub fn enrich(nodes: &mut [Node], inventory: &dyn Inventory, strict: bool) -> Result<()> {
    let mut cache: BTreeMap<String, Option<IpInfo>> = BTreeMap::new();
    for node in nodes.iter_mut() {
        let info = match cache.get(&node.host) {
            Some(cached) => cached.clone(),
            None => {
                let looked_up = match inventory.lookup(&node.host) {
                    Ok(info) => Some(info),
                    Err(err) => {
                        if strict {
                            return Err(err);
                        }
                        warn!(ip = %node.host, %err, "inventory lookup failed, grouping by host");
                        None
                    }
                };
                cache.insert(node.host.clone(), looked_up.clone());
                looked_up
            }
        };
        if let Some(info) = info {
            node.datacenter = Some(info.datacenter);
            node.hostname = Some(info.hostname);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{master, replica};

    #[test]
    fn host_inventory_mirrors_the_address() {
        let info = HostInventory.lookup("10.0.0.1").unwrap();
        assert_eq!(info.datacenter, "10.0.0.1");
    }

    #[test]
    fn static_inventory_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(
            &path,
            r#"{"10.0.0.1": {"datacenter": "dc1", "hostname": "redis-1"},
                "10.0.0.2": {"datacenter": "dc2"}}"#,
        )
        .unwrap();
        let inv = StaticInventory::from_path(&path).unwrap();
        assert_eq!(inv.lookup("10.0.0.1").unwrap().hostname, "redis-1");
        assert_eq!(inv.lookup("10.0.0.2").unwrap().hostname, "10.0.0.2");
        assert!(inv.lookup("10.0.0.9").is_err());
    }

    #[test]
    fn enrich_degrades_or_aborts_on_missing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.json");
        std::fs::write(&path, r#"{"10.0.0.1": {"datacenter": "dc1"}}"#).unwrap();
        let inv = StaticInventory::from_path(&path).unwrap();

        let mut nodes = vec![
            master("m1", "10.0.0.1", 7000),
            replica("s1", "10.0.0.2", 7000, "m1"),
        ];
        enrich(&mut nodes, &inv, false).unwrap();
        assert_eq!(nodes[0].datacenter.as_deref(), Some("dc1"));
        assert_eq!(nodes[1].datacenter, None);

        let mut nodes2 = vec![replica("s1", "10.0.0.2", 7000, "m1")];
        assert!(enrich(&mut nodes2, &inv, true).is_err());
    }
}

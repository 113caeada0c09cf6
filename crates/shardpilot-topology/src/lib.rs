//! Shardpilot Topology - Cluster topology model and invariant checks
//!
//! This crate models a Redis-Cluster membership snapshot as an ordered
//! node list partitioned into fault domains, provides the pure placement
//! checks the planner diagnoses defects with, and handles snapshot
//! persistence and inventory enrichment.

pub mod checks;
pub mod inventory;
pub mod node;
pub mod parse;
pub mod snapshot;
pub mod test_support;
pub mod topology;

pub use checks::DefectReport;
pub use inventory::{enrich, HostInventory, Inventory, IpInfo, StaticInventory};
pub use node::{GroupingMode, Node, NodeFlag};
pub use parse::parse_cluster_nodes;
pub use topology::{by_host, hosts_of, partition_by_group, Topology};

//! Shardpilot Cluster - Redis wire surface
//!
//! The only crate that talks to a live cluster: it snapshots the
//! membership with `CLUSTER NODES` and ships the planner's two command
//! kinds to specific endpoints, with retries and the inter-step delay
//! that lets gossip converge between mutations.

pub mod client;
pub mod executor;

pub use client::ClusterClient;
pub use executor::{CommandShipper, PlanExecutor, RedisShipper};

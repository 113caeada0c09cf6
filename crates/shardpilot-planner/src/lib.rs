//! Shardpilot Planner - Deterministic topology rebalancing
//!
//! Consumes a topology snapshot and produces an ordered plan of
//! `CLUSTER REPLICATE` and `CLUSTER FAILOVER` commands that drives the
//! cluster toward its placement invariants. Planning is pure: the wire
//! is never touched, and the working topology is re-checked after every
//! primitive so defects shrink monotonically.

pub mod candidates;
pub mod plan;

mod balance;
mod fixpoint;
mod planner;
mod primitives;

pub use plan::{CommandKind, FailoverOption, Plan, PlannedCommand};
pub use planner::Planner;

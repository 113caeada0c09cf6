//! Error types for Shardpilot
//!
//! This module defines the common error type used throughout the system.

use crate::types::{Endpoint, NodeId};
use thiserror::Error;

/// Common result type for Shardpilot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Shardpilot.
#[derive(Debug, Error)]
pub enum Error {
    // Topology errors
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node {0} is not a replica")]
    NotAReplica(NodeId),

    #[error("node {0} is not a master")]
    NotAMaster(NodeId),

    #[error("replica {0} references master {1} which is absent from the topology")]
    OrphanReplica(NodeId, NodeId),

    #[error("topology has no masters")]
    NoMasters,

    #[error("invalid plan step: {0}")]
    InvalidPlanStep(String),

    #[error("malformed CLUSTER NODES entry: {0}")]
    Parse(String),

    // Planner errors
    #[error("cannot place {required} replicas per master across {groups} fault domains")]
    InfeasibleDistribution { groups: usize, required: usize },

    #[error("cannot find {required} distinct fault domains for master {master} ({endpoint}, group {group})")]
    ReplicaGroupsUnsatisfiable {
        master: NodeId,
        endpoint: Endpoint,
        group: String,
        required: usize,
    },

    #[error("no replica candidate available for master {0}")]
    NoReplicaCandidate(NodeId),

    #[error("{stage} exceeded the {limit}-iteration safety bound")]
    IterationLimit { stage: &'static str, limit: usize },

    #[error("planner stalled: {0}")]
    Stalled(String),

    // Executor errors
    #[error("node {endpoint} rejected `{command}` after {attempts} attempts")]
    CommandRejected {
        endpoint: Endpoint,
        command: String,
        attempts: u32,
    },

    #[error("transport error: {0}")]
    Transport(String),

    // Inventory errors
    #[error("inventory lookup failed for {ip}: {reason}")]
    Inventory { ip: String, reason: String },

    // Configuration and snapshot errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format error: {0}")]
    SnapshotFormat(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid plan step error.
    pub fn invalid_plan_step(msg: impl Into<String>) -> Self {
        Self::InvalidPlanStep(msg.into())
    }

    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create a planner-stall error.
    pub fn stalled(msg: impl Into<String>) -> Self {
        Self::Stalled(msg.into())
    }

    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a retryable error.
    ///
    /// Only transport failures are worth retrying; everything else is a
    /// deterministic property of the topology or the plan.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::transport("connection reset").is_retryable());
        assert!(!Error::NoMasters.is_retryable());
        assert!(!Error::NodeNotFound(NodeId::new("abc")).is_retryable());
    }

    #[test]
    fn error_messages_name_the_offender() {
        let err = Error::ReplicaGroupsUnsatisfiable {
            master: NodeId::new("deadbeef"),
            endpoint: Endpoint::new("10.0.0.1", 7001),
            group: "dc1".to_string(),
            required: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("deadbeef"));
        assert!(msg.contains("10.0.0.1:7001"));
        assert!(msg.contains("dc1"));
    }
}

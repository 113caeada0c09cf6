//! The ordered command sequence produced by planning.

use shardpilot_common::{Endpoint, NodeId};
use std::fmt;
use std::time::Duration;

/// Optional modifier for `CLUSTER FAILOVER`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailoverOption {
    /// Promote without any agreement from the old master.
    Takeover,
    /// Promote without the old master's acknowledgement but with quorum.
    Force,
}

impl fmt::Display for FailoverOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Takeover => f.write_str("TAKEOVER"),
            Self::Force => f.write_str("FORCE"),
        }
    }
}

/// The command vocabulary of the planner. There is nothing else: every
/// topology change is expressed as a sequence of these two.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Replicate,
    Failover,
}

/// One step of the plan.
#[derive(Clone, Debug)]
pub struct PlannedCommand {
    pub kind: CommandKind,
    /// Endpoint that receives the command (always the replica involved).
    pub run_on: Endpoint,
    /// Node executing the command.
    pub run_node: NodeId,
    /// The other node of the pair: the new master for a replicate, the
    /// demoted master for a failover.
    pub target: NodeId,
    pub option: Option<FailoverOption>,
    /// Human-readable description shown before and during execution.
    pub message: String,
}

impl PlannedCommand {
    /// The exact wire form sent to the cluster.
    #[must_use]
    pub fn wire(&self) -> String {
        match self.kind {
            CommandKind::Replicate => format!("CLUSTER REPLICATE {}", self.target),
            CommandKind::Failover => match self.option {
                Some(option) => format!("CLUSTER FAILOVER {option}"),
                None => "CLUSTER FAILOVER".to_string(),
            },
        }
    }
}

/// Ordered sequence of planned commands.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    commands: Vec<PlannedCommand>,
}

impl Plan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: PlannedCommand) {
        self.commands.push(command);
    }

    #[must_use]
    pub fn commands(&self) -> &[PlannedCommand] {
        &self.commands
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Whether a failover of the given endpoint is already scheduled.
    /// The acceptance rule uses this to never promote one replica twice
    /// in a single run.
    #[must_use]
    pub fn has_failover_at(&self, endpoint: &Endpoint) -> bool {
        self.commands
            .iter()
            .any(|c| c.kind == CommandKind::Failover && &c.run_on == endpoint)
    }

    /// Wall-clock estimate for executing the plan with the given
    /// inter-step delay.
    #[must_use]
    pub fn estimated_duration(&self, step_delay: Duration) -> Duration {
        step_delay * self.commands.len() as u32
    }
}

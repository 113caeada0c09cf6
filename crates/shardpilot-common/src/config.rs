//! Configuration types for Shardpilot
//!
//! Tuning knobs shared between the planner, the executor and the CLI.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Highest port a cluster instance can use; the "no restriction" sentinel
/// for port-reduction mode.
pub const MAX_PORT: u16 = 65535;

/// Safety bound on every planner loop; exceeding it means the planner is
/// stuck in a cycle and must abort with the plan produced so far.
pub const ITERATION_LIMIT: usize = 1000;

/// Planner tuning parameters.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PlannerSettings {
    /// Desired number of replicas per master.
    pub replicas: usize,
    /// Tolerated master distribution spread across groups, in percentage
    /// points (max% - min%).
    pub skew: f64,
    /// Tolerated master distribution spread across hosts inside one
    /// datacenter, in percentage points. Only meaningful in DC-aware mode.
    pub group_skew: f64,
    /// Instances with a port above this value are being retired and must
    /// not hold masters.
    pub max_port: u16,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            replicas: 2,
            skew: 5.0,
            group_skew: 30.0,
            max_port: MAX_PORT,
        }
    }
}

/// Retry policy for a single cluster command.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts per command.
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(120),
        }
    }
}

/// Executor timing parameters.
///
/// The inter-step delay gives the cluster time to converge its gossip
/// state before the next mutation lands.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Pause between consecutive plan steps.
    pub step_delay: Duration,
    /// Per-command retry policy.
    pub retry: RetryPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_secs(90),
            retry: RetryPolicy::default(),
        }
    }
}

//! The two planning primitives.
//!
//! Each primitive applies the model-level effect to the working topology
//! and appends the matching command to the plan. The preview variant
//! applies the effect to a clone without recording anything; the
//! acceptance rule uses it to inspect a step before committing to it.

use crate::plan::{CommandKind, FailoverOption, Plan, PlannedCommand};
use shardpilot_common::{NodeId, Result};
use shardpilot_topology::Topology;
use tracing::debug;

/// Reparent `replica_id` to `master_id` and record the
/// `CLUSTER REPLICATE` step.
pub fn plan_replicate(
    topo: &mut Topology,
    plan: &mut Plan,
    master_id: &NodeId,
    replica_id: &NodeId,
) -> Result<()> {
    let replica = topo.require(replica_id)?;
    let master = topo.require(master_id)?;
    let message = format!(
        "Attach replica {} (group {}) to master {} (group {})",
        replica.label(),
        replica.group(topo.mode()),
        master.label(),
        master.group(topo.mode()),
    );
    let command = PlannedCommand {
        kind: CommandKind::Replicate,
        run_on: replica.endpoint(),
        run_node: replica_id.clone(),
        target: master_id.clone(),
        option: None,
        message,
    };
    topo.apply_replicate(master_id, replica_id)?;
    debug!(command = %command.wire(), run_on = %command.run_on, "planned replicate");
    plan.push(command);
    Ok(())
}

/// Promote `replica_id` over its master and record the
/// `CLUSTER FAILOVER` step.
pub fn plan_failover(
    topo: &mut Topology,
    plan: &mut Plan,
    replica_id: &NodeId,
    option: FailoverOption,
) -> Result<()> {
    let replica = topo.require(replica_id)?;
    let old_master = topo.master_of(replica_id)?;
    let message = format!(
        "Failover replica {} (group {}) [old master {} (group {})]",
        replica.label(),
        replica.group(topo.mode()),
        old_master.label(),
        old_master.group(topo.mode()),
    );
    let command = PlannedCommand {
        kind: CommandKind::Failover,
        run_on: replica.endpoint(),
        run_node: replica_id.clone(),
        target: old_master.node_id.clone(),
        option: Some(option),
        message,
    };
    topo.apply_failover(replica_id)?;
    debug!(command = %command.wire(), run_on = %command.run_on, "planned failover");
    plan.push(command);
    Ok(())
}

/// The topology as it would look after failing over `replica_id`,
/// without touching the plan.
pub fn preview_failover(topo: &Topology, replica_id: &NodeId) -> Result<Topology> {
    let mut clone = topo.clone();
    clone.apply_failover(replica_id)?;
    Ok(clone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardpilot_topology::test_support::topology;
    use shardpilot_topology::GroupingMode;

    fn three_node_shard() -> Topology {
        topology(
            GroupingMode::Host,
            &[
                ("m1", "10.0.0.1", 7000, None),
                ("m2", "10.0.0.2", 7000, None),
                ("s1", "10.0.0.3", 7000, Some("m1")),
            ],
        )
    }

    #[test]
    fn replicate_records_one_command() {
        let mut topo = three_node_shard();
        let mut plan = Plan::new();
        plan_replicate(&mut topo, &mut plan, &"m2".into(), &"s1".into()).unwrap();

        assert_eq!(plan.len(), 1);
        let cmd = &plan.commands()[0];
        assert_eq!(cmd.wire(), "CLUSTER REPLICATE m2");
        assert_eq!(cmd.run_on.to_string(), "10.0.0.3:7000");
        assert!(cmd.message.contains("s1"));
        assert!(cmd.message.contains("m2"));
        assert_eq!(topo.get(&"s1".into()).unwrap().master_id, Some("m2".into()));
    }

    #[test]
    fn failover_records_endpoint_of_the_promoted_replica() {
        let mut topo = three_node_shard();
        let mut plan = Plan::new();
        plan_failover(&mut topo, &mut plan, &"s1".into(), FailoverOption::Takeover).unwrap();

        let cmd = &plan.commands()[0];
        assert_eq!(cmd.wire(), "CLUSTER FAILOVER TAKEOVER");
        assert_eq!(cmd.run_on.to_string(), "10.0.0.3:7000");
        assert_eq!(cmd.target, "m1".into());
        assert!(topo.get(&"s1".into()).unwrap().is_master());
    }

    #[test]
    fn preview_leaves_the_input_untouched() {
        let topo = three_node_shard();
        let preview = preview_failover(&topo, &"s1".into()).unwrap();
        assert!(preview.get(&"s1".into()).unwrap().is_master());
        assert!(topo.get(&"s1".into()).unwrap().is_replica());
    }

    #[test]
    fn failed_primitives_leave_no_trace() {
        let mut topo = three_node_shard();
        let mut plan = Plan::new();
        assert!(plan_failover(&mut topo, &mut plan, &"m1".into(), FailoverOption::Takeover).is_err());
        assert!(plan_replicate(&mut topo, &mut plan, &"s1".into(), &"m1".into()).is_err());
        assert!(plan.is_empty());
        assert_eq!(topo, three_node_shard());
    }
}

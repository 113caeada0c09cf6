//! Human-readable cluster and defect reports.

use shardpilot_common::config::PlannerSettings;
use shardpilot_topology::{by_host, checks, hosts_of, Topology};

fn spread(values: impl Iterator<Item = f64>) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        min = min.min(v);
        max = max.max(v);
    }
    if min.is_finite() {
        ((max - min) * 100.0).round() / 100.0
    } else {
        0.0
    }
}

/// Per-group master/replica counts with skew percentages, one block per
/// group, host breakdown for multi-host groups.
pub fn print_cluster_info(topo: &Topology, settings: &PlannerSettings) {
    let max_port = settings.max_port;
    let shares = checks::group_master_shares(topo, max_port);
    let per_host_shares = checks::subgroup_master_shares(topo, max_port);

    for (group, nodes) in topo.groups(max_port) {
        let masters = nodes.iter().filter(|n| n.is_master()).count();
        let replicas = nodes.iter().filter(|n| n.is_replica()).count();
        let share = shares.get(group).copied().unwrap_or(0.0);
        println!("    Group {group} ({share}% of masters): masters {masters:<3} replicas {replicas:<3}");

        let hosts = hosts_of(&nodes);
        if hosts.len() > 1 {
            for host in hosts {
                let host_nodes = by_host(&nodes, host);
                let host_masters = host_nodes.iter().filter(|n| n.is_master()).count();
                let host_replicas = host_nodes.iter().filter(|n| n.is_replica()).count();
                let host_share = per_host_shares
                    .get(group)
                    .and_then(|m| m.get(host))
                    .copied()
                    .unwrap_or(0.0);
                let hostname = host_nodes
                    .first()
                    .and_then(|n| n.hostname.as_deref())
                    .unwrap_or(host);
                println!(
                    "        host {hostname} ({host}) holds {host_share}% of the group's masters: \
                     masters {host_masters:<3} replicas {host_replicas:<3}"
                );
            }
        }
    }
    println!("Skew is {}%", spread(shares.values().copied()));
    if let Ok(current) = topo.inferred_replicas(max_port) {
        println!("Actual replica count is {current}");
    }
}

/// Print every detected defect. Returns whether anything was printed.
pub fn print_problems(topo: &Topology, settings: &PlannerSettings) -> bool {
    let report = checks::DefectReport::collect(topo, settings);
    let mut printed = false;

    if !report.slave_of_slave.is_empty() {
        printed = true;
        println!(
            "Replicas chained behind other replicas ({}):",
            report.slave_of_slave.len()
        );
        for (replica, fake_master) in &report.slave_of_slave {
            println!("    Replica {replica} replicates from replica {fake_master}");
        }
        println!();
    }

    if !report.colocation.is_empty() {
        let count: usize = report.colocation.values().map(Vec::len).sum();
        printed = true;
        println!("Master and replica sharing a group ({count}):");
        for (group, issues) in &report.colocation {
            for issue in issues {
                for replica in &issue.replicas {
                    println!(
                        "    Group {group} has master {} with replica {} alongside it",
                        issue.master.label(),
                        replica.label(),
                    );
                }
            }
        }
        println!();
    }

    if !report.concentration.is_empty() {
        let count: usize = report.concentration.values().map(Vec::len).sum();
        printed = true;
        println!("Replicas of one master piled into a group ({count}):");
        for (group, issues) in &report.concentration {
            for issue in issues {
                let subjects: Vec<String> =
                    issue.replicas.iter().map(|r| r.label()).collect();
                println!(
                    "    Group {group} holds {} replicas of master {}: {}",
                    issue.replicas.len(),
                    issue.master.label(),
                    subjects.join(" and "),
                );
            }
        }
        println!();
    }

    if !report.missing_replicas.is_empty() {
        printed = true;
        println!(
            "Masters below the desired replica count {} ({}):",
            settings.replicas,
            report.missing_replicas.len()
        );
        for (master, count) in &report.missing_replicas {
            if let Some(node) = topo.get(master) {
                println!("    Master {} has {count} replicas", node.label());
            }
        }
        println!();
    }

    if !report.without_replicas.is_empty() {
        printed = true;
        println!("Masters with no replicas ({}):", report.without_replicas.len());
        for master in &report.without_replicas {
            if let Some(node) = topo.get(master) {
                println!("    Master {}", node.label());
            }
        }
        println!();
    }

    if let Some(shares) = &report.group_skew {
        printed = true;
        println!(
            "Master distribution spread exceeds {}% (actual {}%):",
            settings.skew,
            spread(shares.values().copied())
        );
        for (group, share) in shares {
            println!("    Group {group}: {share}%");
        }
        println!();
    }

    for (group, hosts) in &report.in_group_skew {
        printed = true;
        println!(
            "Group {group} spreads its masters unevenly across hosts, more than {}% (actual {}%):",
            settings.group_skew,
            spread(hosts.values().copied())
        );
        for (host, share) in hosts {
            println!("    Host {host}: {share}%");
        }
        println!();
    }

    printed
}

//! Parser for the CLUSTER NODES text format.
//!
//! Each line is
//! `<id> <ip:port@cport[,hostname]> <flags> <master> <ping-sent> <pong-recv>
//! <config-epoch> <link-state> [<slot> ...]`.

use crate::node::{Node, NodeFlag};
use shardpilot_common::{Error, NodeId, Result};
use std::collections::BTreeSet;

/// Parse the full CLUSTER NODES output into a node list.
///
/// The result keeps the server's line order; callers sort when building a
/// [`crate::Topology`].
pub fn parse_cluster_nodes(raw: &str) -> Result<Vec<Node>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<Node> {
    let mut fields = line.split_whitespace();
    let mut next = |what: &str| {
        fields
            .next()
            .ok_or_else(|| Error::parse(format!("missing {what} in `{line}`")))
    };

    let node_id = NodeId::new(next("node id")?);
    let (host, port) = parse_address(next("address")?)?;
    let flags = parse_flags(next("flags")?);
    let master_id = match next("master id")? {
        "-" => None,
        id => Some(NodeId::new(id)),
    };
    let ping_sent = parse_number(next("ping-sent")?, line)?;
    let pong_recv = parse_number(next("pong-recv")?, line)?;
    let config_epoch = parse_number(next("config-epoch")?, line)?;
    let connected = next("link state")? == "connected";

    // Remaining fields are slot descriptors. Bracketed entries are
    // in-flight migrations, not ownership, and are not retained.
    let slots = fields
        .filter(|s| !s.starts_with('['))
        .map(str::to_string)
        .collect();

    Ok(Node {
        node_id,
        host,
        port,
        flags,
        master_id,
        ping_sent,
        pong_recv,
        config_epoch,
        connected,
        slots,
        datacenter: None,
        hostname: None,
    })
}

fn parse_address(addr: &str) -> Result<(String, u16)> {
    // Strip the hostname annotation (`ip:port@cport,hostname`) and the
    // cluster bus port.
    let addr = addr.split(',').next().unwrap_or(addr);
    let addr = addr.split('@').next().unwrap_or(addr);
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::parse(format!("address `{addr}` has no port")))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::parse(format!("invalid port in `{addr}`")))?;
    Ok((host.to_string(), port))
}

fn parse_flags(raw: &str) -> BTreeSet<NodeFlag> {
    raw.split(',').filter_map(NodeFlag::from_token).collect()
}

fn parse_number(raw: &str, line: &str) -> Result<u64> {
    raw.parse::<u64>()
        .map_err(|_| Error::parse(format!("invalid numeric field `{raw}` in `{line}`")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004,replica-4 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 slave 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238316232 5 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922 [5462->-67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1]
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master,fail - 1426238316232 1426238315000 3 disconnected 10923-16383
";

    #[test]
    fn parses_roles_and_addresses() {
        let nodes = parse_cluster_nodes(SAMPLE).unwrap();
        assert_eq!(nodes.len(), 5);

        let replica = &nodes[0];
        assert_eq!(replica.host, "127.0.0.1");
        assert_eq!(replica.port, 30004);
        assert!(replica.is_replica());
        assert_eq!(
            replica.master_id,
            Some(NodeId::new("e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca"))
        );

        let master = &nodes[1];
        assert!(master.is_master());
        assert!(master.has_flag(NodeFlag::Myself));
        assert_eq!(master.master_id, None);
        assert_eq!(master.slots, vec!["0-5460".to_string()]);
    }

    #[test]
    fn migration_entries_are_not_ownership() {
        let nodes = parse_cluster_nodes(SAMPLE).unwrap();
        assert_eq!(nodes[3].slots, vec!["5461-10922".to_string()]);
    }

    #[test]
    fn link_state_and_fail_flag() {
        let nodes = parse_cluster_nodes(SAMPLE).unwrap();
        let failed = &nodes[4];
        assert!(!failed.connected);
        assert!(failed.is_failed());
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(parse_cluster_nodes("deadbeef 127.0.0.1:7000").is_err());
        assert!(parse_cluster_nodes("deadbeef noport master - 0 0 1 connected").is_err());
    }
}

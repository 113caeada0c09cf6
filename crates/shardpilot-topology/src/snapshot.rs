//! Snapshot persistence for debugging and offline planning.
//!
//! A snapshot is the enriched node list serialized as JSON, one entry per
//! node with every attribute preserved. Loading one reconstructs a
//! topology without contacting any server.

use crate::node::Node;
use shardpilot_common::Result;
use std::fs;
use std::path::Path;
use tracing::info;

/// Write the node list to `path` as pretty-printed JSON.
pub fn save(path: &Path, nodes: &[Node]) -> Result<()> {
    let payload = serde_json::to_string_pretty(nodes)?;
    fs::write(path, payload)?;
    info!(path = %path.display(), nodes = nodes.len(), "saved topology snapshot");
    Ok(())
}

/// Read a node list previously written by [`save`].
pub fn load(path: &Path) -> Result<Vec<Node>> {
    let payload = fs::read_to_string(path)?;
    let nodes: Vec<Node> = serde_json::from_str(&payload)?;
    info!(path = %path.display(), nodes = nodes.len(), "loaded topology snapshot");
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{master, replica};

    #[test]
    fn round_trip_preserves_every_attribute() {
        let mut m = master("m1", "10.0.0.1", 7000);
        m.hostname = Some("redis-1.example.net".to_string());
        m.datacenter = Some("dc1".to_string());
        m.ping_sent = 17;
        m.pong_recv = 1_610_468_870_000;
        m.config_epoch = 42;
        let mut s = replica("s1", "10.0.0.2", 7000, "m1");
        s.connected = false;
        let nodes = vec![m, s];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        save(&path, &nodes).unwrap();
        let restored = load(&path).unwrap();
        assert_eq!(nodes, restored);
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        fs::write(&path, "{not json").unwrap();
        assert!(load(&path).is_err());
    }
}

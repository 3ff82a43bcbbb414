use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use edge_dpos::DposConfig;
use edge_sync::PeerAddr;

use crate::error::NodeError;

/// Health gate limits: the proposer yields whenever a sensor reading
/// exceeds any of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub max_temperature: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            max_cpu_percent: 70.0,
            max_memory_percent: 80.0,
            max_temperature: 80.0,
        }
    }
}

/// Full node configuration, normally loaded from a TOML file with the node
/// id overridable through the CLI/environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// This node's id; must appear in the initial stake table.
    pub node_id: String,

    /// Where the sled database lives.
    pub data_dir: PathBuf,

    /// Port of the peer HTTP surface.
    pub api_port: u16,

    /// TCP port the gossip transport listens on.
    pub gossip_port: u16,

    /// Target seconds between blocks.
    pub block_time: f64,

    /// Seconds between peer catch-up rounds.
    pub sync_interval: f64,

    /// Seconds between heartbeat publications.
    pub metrics_interval: f64,

    /// Timestamp allowance for peer-supplied blocks during validation.
    pub sync_tolerance: f64,

    /// Peer HTTP timeout in seconds.
    pub http_timeout: f64,

    /// At-most-N attempts for peer HTTP requests.
    pub retry_attempts: u32,

    /// Multiaddrs of gossip bootstrap brokers to dial at startup, tried in
    /// order.
    pub bootstrap: Vec<String>,

    /// Stake table committed by the genesis block.
    pub initial_stakes: BTreeMap<String, f64>,

    pub thresholds: HealthThresholds,

    /// The fixed peer roster (may include this node's own entry).
    pub peers: Vec<PeerAddr>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "edge_node_1".to_string(),
            data_dir: PathBuf::from("data"),
            api_port: 8001,
            gossip_port: 51833,
            block_time: 3.0,
            sync_interval: 60.0,
            metrics_interval: 5.0,
            sync_tolerance: 0.0,
            http_timeout: 10.0,
            retry_attempts: 3,
            bootstrap: Vec::new(),
            initial_stakes: BTreeMap::from([("edge_node_1".to_string(), 1000.0)]),
            thresholds: HealthThresholds::default(),
            peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Parse a config file.  Any I/O or TOML problem is fatal.
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| NodeError::Config(format!("invalid config: {e}")))
    }

    /// Startup sanity checks: the node must be a configured validator, and
    /// every roster entry needs an address.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.node_id.trim().is_empty() {
            return Err(NodeError::Config("node_id is empty".into()));
        }
        if !self.initial_stakes.contains_key(&self.node_id) {
            return Err(NodeError::Config(format!(
                "unknown node id {:?}: not present in the initial stake table",
                self.node_id
            )));
        }
        for peer in &self.peers {
            if peer.host.trim().is_empty() {
                return Err(NodeError::Config(format!(
                    "roster entry {:?} has no host",
                    peer.id
                )));
            }
        }
        Ok(())
    }

    /// Every roster entry except this node itself.
    pub fn peer_roster(&self) -> Vec<PeerAddr> {
        self.peers
            .iter()
            .filter(|peer| peer.id != self.node_id)
            .cloned()
            .collect()
    }

    /// The consensus engine tunables derived from this config.
    pub fn dpos_config(&self) -> DposConfig {
        DposConfig {
            block_time: self.block_time,
            ..DposConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_node_config() -> NodeConfig {
        NodeConfig {
            node_id: "node_b".into(),
            peers: vec![
                PeerAddr { id: "node_a".into(), host: "10.0.0.1".into(), port: 8001 },
                PeerAddr { id: "node_b".into(), host: "10.0.0.2".into(), port: 8002 },
                PeerAddr { id: "node_c".into(), host: "10.0.0.3".into(), port: 8003 },
            ],
            initial_stakes: BTreeMap::from([
                ("node_a".to_string(), 1000.0),
                ("node_b".to_string(), 1000.0),
                ("node_c".to_string(), 1000.0),
            ]),
            ..NodeConfig::default()
        }
    }

    #[test]
    fn roster_excludes_self() {
        let config = three_node_config();
        let roster = config.peer_roster();
        assert_eq!(roster.len(), 2);
        assert!(roster.iter().all(|p| p.id != "node_b"));
    }

    #[test]
    fn unknown_node_id_is_fatal() {
        let mut config = three_node_config();
        config.node_id = "node_z".into();
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));
    }

    #[test]
    fn valid_config_passes() {
        three_node_config().validate().unwrap();
    }

    #[test]
    fn toml_round_trip() {
        let config = three_node_config();
        let raw = toml::to_string(&config).unwrap();
        let parsed: NodeConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let parsed: NodeConfig = toml::from_str(
            r#"
            node_id = "edge_node_1"
            block_time = 2.0
            "#,
        )
        .unwrap();
        assert_eq!(parsed.block_time, 2.0);
        assert_eq!(parsed.sync_interval, 60.0);
        assert_eq!(parsed.thresholds, HealthThresholds::default());
    }
}

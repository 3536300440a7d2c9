//! Configuration for a vecraft node

use crate::common::address;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID (unique, stable across restarts)
    pub node_id: String,

    /// Host shared by the consensus and coordination endpoints
    #[serde(default = "default_host")]
    pub host: String,

    /// Base port; consensus listens on base*10+1, coordination on base*10+2
    pub base_port: u16,

    /// Local vector store gRPC address (e.g. http://127.0.0.1:50051)
    pub backend_addr: String,

    /// Data directory for Raft logs, stable state and snapshots
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Bootstrap as the first node of a new cluster
    #[serde(default)]
    pub bootstrap: bool,

    /// Seed coordination endpoints used to join an existing cluster
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Raft apply deadline for client writes
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_ms: u64,

    /// Raft heartbeat interval
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Log entries since the last snapshot before a new one is taken
    #[serde(default = "default_snapshot_threshold")]
    pub snapshot_threshold: u64,

    /// Chunk size requested from the backend's snapshot export
    #[serde(default = "default_snapshot_chunk_size")]
    pub snapshot_chunk_size: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_apply_timeout() -> u64 {
    5_000
}
fn default_heartbeat_interval() -> u64 {
    250
}
fn default_snapshot_threshold() -> u64 {
    5_000
}
fn default_snapshot_chunk_size() -> u32 {
    256 * 1024
}

impl NodeConfig {
    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NodeConfig = serde_json::from_str(&content)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| crate::Error::InvalidConfig(format!("failed to serialize: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node_id.is_empty() {
            return Err(crate::Error::InvalidConfig("node_id is required".into()));
        }
        if self.base_port == 0 {
            return Err(crate::Error::InvalidConfig("base_port is required".into()));
        }
        if self.base_port > 6552 {
            return Err(crate::Error::InvalidConfig(
                "base_port too large: derived ports must fit in 16 bits".into(),
            ));
        }
        if self.backend_addr.is_empty() {
            return Err(crate::Error::InvalidConfig("backend_addr is required".into()));
        }
        if self.bootstrap && !self.seeds.is_empty() {
            return Err(crate::Error::InvalidConfig(
                "bootstrap node must not list seeds".into(),
            ));
        }
        Ok(())
    }

    /// Consensus endpoint (Raft transport) of this node.
    pub fn consensus_addr(&self) -> String {
        address::consensus_addr(&self.host, self.base_port)
    }

    /// Coordination endpoint (client RPC) of this node.
    pub fn coordination_addr(&self) -> String {
        address::coordination_addr(&self.host, self.base_port)
    }

    /// Per-node data directory.
    pub fn node_data_dir(&self) -> PathBuf {
        self.data_dir.join(&self.node_id)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_millis(self.apply_timeout_ms)
    }
}

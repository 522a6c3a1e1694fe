use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util::errors::{Result, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaftConfig {
    /// This node's identity on the wire: its advertised `host:port` address
    pub node_id: String,

    /// Minimum election timeout in milliseconds (e.g., 150)
    pub election_timeout_min_ms: u64,

    /// Maximum election timeout in milliseconds (e.g., 300)
    pub election_timeout_max_ms: u64,

    /// Heartbeat interval in milliseconds (e.g., 50)
    /// Should be much less than election timeout
    pub heartbeat_interval_ms: u64,

    /// Directory for persistent storage
    pub data_dir: PathBuf,
}

impl RaftConfig {
    pub fn election_timeout_min(&self) -> Duration {
        Duration::from_millis(self.election_timeout_min_ms)
    }

    pub fn election_timeout_max(&self) -> Duration {
        Duration::from_millis(self.election_timeout_max_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.election_timeout_min_ms >= self.election_timeout_max_ms {
            return Err(StoreError::InvalidConfig(
                "election_timeout_min must be less than election_timeout_max".to_string(),
            ));
        }

        if self.heartbeat_interval_ms >= self.election_timeout_min_ms {
            return Err(StoreError::InvalidConfig(
                "heartbeat_interval must be less than election_timeout_min".to_string(),
            ));
        }

        if self.node_id.is_empty() {
            return Err(StoreError::InvalidConfig(
                "node_id cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            node_id: "127.0.0.1:7000".to_string(),
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            heartbeat_interval_ms: 50,
            data_dir: PathBuf::from("./data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address to bind the listening socket to
    pub listen_addr: String,
    /// Address peers and clients should use to reach this node
    pub advertise_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7000".to_string(),
            advertise_addr: "127.0.0.1:7000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Human-readable node name from the CLI, used for the data dir default
    pub name: String,
    pub network: NetworkConfig,
    pub raft: RaftConfig,
    /// Advertised addresses of the other cluster members
    pub peers: Vec<String>,
}

impl Config {
    /// Assemble the configuration for one node from CLI arguments. The data
    /// directory defaults to `./data/<id>`.
    pub fn for_node(
        id: &str,
        port: u16,
        peers: Vec<String>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let advertise = format!("127.0.0.1:{}", port);
        Self {
            name: id.to_string(),
            network: NetworkConfig {
                listen_addr: format!("0.0.0.0:{}", port),
                advertise_addr: advertise.clone(),
            },
            raft: RaftConfig {
                node_id: advertise,
                data_dir: data_dir.unwrap_or_else(|| PathBuf::from("./data").join(id)),
                ..RaftConfig::default()
            },
            peers,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.raft.validate()?;
        if self.peers.iter().any(|p| p == &self.network.advertise_addr) {
            return Err(StoreError::InvalidConfig(
                "peer list must not contain this node's own address".to_string(),
            ));
        }
        Ok(())
    }
}

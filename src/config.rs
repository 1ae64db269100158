//! Configuration management for the Aurum node
//!
//! Node settings persist as `config.json` under the data directory. Chain
//! parameters are fixed at genesis: two nodes with different parameters are
//! different networks.

use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Consensus parameters fixed at genesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainParams {
    #[serde(default = "default_network_id")]
    pub network_id: String,
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,
    #[serde(default = "default_block_reward")]
    pub block_reward: u64,
    #[serde(default = "default_min_stake")]
    pub min_stake: u64,
    #[serde(default = "default_max_supply")]
    pub max_supply: u64,
    #[serde(default = "default_initial_supply")]
    pub initial_supply: u64,
    #[serde(default = "default_max_block_txs")]
    pub max_block_txs: usize,
    /// Reserved alongside the header nonce for future difficulty use.
    #[serde(default = "default_difficulty_adjustment_interval")]
    pub difficulty_adjustment_interval: u64,
    #[serde(default = "default_genesis_timestamp")]
    pub genesis_timestamp: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        ChainParams {
            network_id: default_network_id(),
            block_time_ms: default_block_time_ms(),
            block_reward: default_block_reward(),
            min_stake: default_min_stake(),
            max_supply: default_max_supply(),
            initial_supply: default_initial_supply(),
            max_block_txs: default_max_block_txs(),
            difficulty_adjustment_interval: default_difficulty_adjustment_interval(),
            genesis_timestamp: default_genesis_timestamp(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_p2p_port")]
    pub p2p_port: u16,
    /// Reserved for the dashboard RPC collaborator; nothing in this crate
    /// binds it.
    #[serde(default = "default_rpc_port")]
    pub rpc_port: u16,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    #[serde(default = "default_true")]
    pub enable_discovery: bool,
    #[serde(default = "default_true")]
    pub enable_api: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            p2p_port: default_p2p_port(),
            rpc_port: default_rpc_port(),
            api_port: default_api_port(),
            bootstrap_peers: Vec::new(),
            max_peers: default_max_peers(),
            enable_discovery: true,
            enable_api: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Write a ledger snapshot after every Kth appended block.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            snapshot_interval: default_snapshot_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Address of the keystore wallet used to sign produced blocks.
    #[serde(default)]
    pub address: Option<String>,
    /// Keystore password; prefer the AURUM_VALIDATOR_PASSWORD environment
    /// variable over storing it here.
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub params: ChainParams,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: NetworkConfig::default(),
            node: NodeConfig::default(),
            validator: ValidatorConfig::default(),
            params: ChainParams::default(),
        }
    }
}

impl Config {
    /// Load `config.json` from the data directory, creating it with defaults
    /// on first start.
    pub fn load_or_init(data_dir: &Path) -> Result<Config> {
        let path = data_dir.join("config.json");
        let mut config = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str(&raw)
                .map_err(|e| NodeError::StorageFailure(format!("invalid config.json: {}", e)))?
        } else {
            Config::default()
        };
        config.node.data_dir = data_dir.to_string_lossy().to_string();
        config.validate()?;

        if !path.exists() {
            fs::create_dir_all(data_dir)?;
            fs::write(&path, serde_json::to_string_pretty(&config)?)?;
        }
        Ok(config)
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir)?;
        fs::write(data_dir.join("config.json"), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.params.network_id.is_empty() {
            return Err(NodeError::StorageFailure("network_id must not be empty".to_string()));
        }
        if self.network.max_peers == 0 {
            return Err(NodeError::StorageFailure("max_peers must be at least 1".to_string()));
        }
        if self.params.initial_supply > self.params.max_supply {
            return Err(NodeError::StorageFailure(
                "initial_supply exceeds max_supply".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_network_id() -> String {
    "aurum-dev".to_string()
}

fn default_block_time_ms() -> u64 {
    15_000
}

fn default_block_reward() -> u64 {
    5
}

fn default_min_stake() -> u64 {
    1_000
}

fn default_max_supply() -> u64 {
    100_000_000
}

fn default_initial_supply() -> u64 {
    10_000_000
}

fn default_max_block_txs() -> usize {
    500
}

fn default_difficulty_adjustment_interval() -> u64 {
    2_016
}

fn default_genesis_timestamp() -> u64 {
    1_700_000_000_000
}

fn default_p2p_port() -> u16 {
    7601
}

fn default_rpc_port() -> u16 {
    7602
}

fn default_api_port() -> u16 {
    7603
}

fn default_max_peers() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_snapshot_interval() -> u64 {
    1
}

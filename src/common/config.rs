//! Configuration for a minizab node

use crate::common::{Ensemble, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix (`MINIZAB_NODE__ID`, `MINIZAB_NODE__SERVERS`, ...)
pub const ENV_PREFIX: &str = "MINIZAB";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node-specific config
    #[serde(default)]
    pub node: NodeConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load defaults, then an optional TOML file, then `MINIZAB_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("node.servers")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.node.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity of this node (`host:port`, also its peer address)
    pub id: String,

    /// Bind address for the HTTP API
    pub bind_addr: SocketAddr,

    /// Every ensemble member, this node included
    pub servers: Vec<String>,

    /// Leader at startup
    pub leader: String,

    /// Metadata store backend
    #[serde(default = "default_storage")]
    pub storage: StorageBackend,

    /// RocksDB path for the metadata log
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Run a sync round once the listener is up
    #[serde(default = "default_true")]
    pub sync_on_startup: bool,

    /// Start an election after `wakeup_delay_ms` at startup
    #[serde(default)]
    pub elect_on_wakeup: bool,

    #[serde(default = "default_wakeup_delay")]
    pub wakeup_delay_ms: u64,

    /// Upper bound for a proposal or sync round. Unset means wait forever.
    #[serde(default)]
    pub round_timeout_ms: Option<u64>,

    /// Per-request timeout for peer RPCs
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,

    /// Maximum accepted request body
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,
}

fn default_storage() -> StorageBackend {
    StorageBackend::Rocksdb
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./zab-data")
}
fn default_true() -> bool {
    true
}
fn default_wakeup_delay() -> u64 {
    2_000
}
fn default_rpc_timeout() -> u64 {
    5_000
}
fn default_max_body() -> usize {
    1024 * 1024
}

impl Default for NodeConfig {
    fn default() -> Self {
        let id = "127.0.0.1:7000".to_string();
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7000)),
            servers: vec![id.clone()],
            leader: id.clone(),
            id,
            storage: default_storage(),
            db_path: default_db_path(),
            sync_on_startup: true,
            elect_on_wakeup: false,
            wakeup_delay_ms: default_wakeup_delay(),
            round_timeout_ms: None,
            rpc_timeout_ms: default_rpc_timeout(),
            max_body_bytes: default_max_body(),
        }
    }
}

impl NodeConfig {
    /// Check membership invariants and build the ensemble
    pub fn validate(&self) -> Result<Ensemble> {
        let ensemble = Ensemble::new(self.id.clone(), self.servers.clone())?;
        if !ensemble.contains(&self.leader) {
            return Err(crate::Error::InvalidConfig(format!(
                "leader {} is not a member of the ensemble",
                self.leader
            )));
        }
        Ok(ensemble)
    }

    pub fn round_timeout(&self) -> Option<Duration> {
        self.round_timeout_ms.map(Duration::from_millis)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn wakeup_delay(&self) -> Duration {
        Duration::from_millis(self.wakeup_delay_ms)
    }
}

//! Configuration types for the ledger indexer
//!
//! The shape mirrors the operator-facing `setup.yml`: one section for the
//! ledger node, one for indexing cadence and the records directory, one for
//! the IPFS node.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main indexer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Ledger node connection
    #[serde(default)]
    pub rippled: RippledConfig,

    /// Indexing cadence and records directory
    #[serde(default)]
    pub indexer: IndexingConfig,

    /// IPFS node API and IPNS publication
    #[serde(default)]
    pub ipfsnode: IpfsNodeConfig,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl IndexerConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.rippled.validate()?;
        self.indexer.validate()?;
        self.ipfsnode.validate()?;

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(crate::Error::config(format!(
                "log_level '{}' is not valid. Valid levels: trace, debug, info, warn, error",
                other
            ))),
        }
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rippled: RippledConfig::default(),
            indexer: IndexingConfig::default(),
            ipfsnode: IpfsNodeConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Ledger node connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RippledConfig {
    /// Node host name
    #[serde(default = "default_rippled_host")]
    pub host: String,

    /// Node WebSocket port
    #[serde(default = "default_rippled_port")]
    pub port: u16,

    /// Use `wss://` instead of `ws://`
    #[serde(default = "default_true")]
    pub secure: bool,

    /// Delay before reconnecting after the connection drops.
    ///
    /// Unset means the indexer stays disconnected until restarted.
    #[serde(default)]
    pub reconnect_delay_ms: Option<u64>,

    /// Largest inbound frame or message accepted from the node (MiB).
    ///
    /// One `ledger_data` page at the default page limit runs to tens of MiB.
    #[serde(default = "default_max_message_mib")]
    pub max_message_mib: usize,
}

impl RippledConfig {
    /// WebSocket endpoint URL for the configured node
    pub fn endpoint(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    /// Reconnect delay, if reconnecting is enabled
    pub fn reconnect_delay(&self) -> Option<Duration> {
        self.reconnect_delay_ms.map(Duration::from_millis)
    }

    /// Inbound size limit in bytes
    pub fn max_message_bytes(&self) -> usize {
        self.max_message_mib.saturating_mul(1024 * 1024)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.host.is_empty() {
            return Err(crate::Error::config("rippled.host cannot be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::config("rippled.port must be > 0"));
        }
        if self.reconnect_delay_ms == Some(0) {
            return Err(crate::Error::config(
                "rippled.reconnect_delay_ms must be > 0 when set",
            ));
        }
        if self.max_message_mib == 0 {
            return Err(crate::Error::config("rippled.max_message_mib must be > 0"));
        }
        Ok(())
    }
}

impl Default for RippledConfig {
    fn default() -> Self {
        Self {
            host: default_rippled_host(),
            port: default_rippled_port(),
            secure: true,
            reconnect_delay_ms: None,
            max_message_mib: default_max_message_mib(),
        }
    }
}

/// Indexing cadence and records directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// How often a new index snapshot is requested (milliseconds)
    #[serde(default = "default_create_index_ms")]
    pub create_index_ms: u64,

    /// How often the latest closed ledger index is refreshed (milliseconds)
    #[serde(default = "default_freq_index_check_ms")]
    pub freq_index_check_ms: u64,

    /// Records root: one subdirectory per completed index plus `meta.json`
    #[serde(default = "default_file_path")]
    pub file_path: PathBuf,

    /// Index directories older than this are pruned before each publish (seconds)
    #[serde(default = "default_remove_indexes_secs")]
    pub remove_indexes_secs: u64,

    /// Also copy each tag file to the records root
    #[serde(default)]
    pub root_copy: bool,

    /// Records requested per `ledger_data` page
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

impl IndexingConfig {
    /// Interval between snapshot requests
    pub fn create_index_interval(&self) -> Duration {
        Duration::from_millis(self.create_index_ms)
    }

    /// Interval between latest-index refreshes
    pub fn index_check_interval(&self) -> Duration {
        Duration::from_millis(self.freq_index_check_ms)
    }

    /// Maximum age of an index directory before it is pruned
    pub fn remove_indexes_after(&self) -> Duration {
        Duration::from_secs(self.remove_indexes_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.create_index_ms == 0 {
            return Err(crate::Error::config("indexer.create_index_ms must be > 0"));
        }
        if self.freq_index_check_ms == 0 {
            return Err(crate::Error::config(
                "indexer.freq_index_check_ms must be > 0",
            ));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(crate::Error::config("indexer.file_path cannot be empty"));
        }
        if self.remove_indexes_secs == 0 {
            return Err(crate::Error::config(
                "indexer.remove_indexes_secs must be > 0",
            ));
        }
        if self.page_limit == 0 {
            return Err(crate::Error::config("indexer.page_limit must be > 0"));
        }
        Ok(())
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            create_index_ms: default_create_index_ms(),
            freq_index_check_ms: default_freq_index_check_ms(),
            file_path: default_file_path(),
            remove_indexes_secs: default_remove_indexes_secs(),
            root_copy: false,
            page_limit: default_page_limit(),
        }
    }
}

/// IPFS node API and IPNS publication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsNodeConfig {
    /// RPC API host
    #[serde(default = "default_api_host")]
    pub api_host: String,

    /// RPC API port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Name of the IPNS key the records root is published under
    #[serde(default = "default_ipns_key")]
    pub ipns_key: String,

    /// IPNS record validity lifetime (e.g. "24h")
    #[serde(default = "default_ipns_lifetime")]
    pub ipns_lifetime: String,

    /// IPNS record cache TTL (e.g. "1m")
    #[serde(default = "default_ipns_ttl")]
    pub ipns_ttl: String,

    /// Content identifiers that are never unpinned
    #[serde(default)]
    pub ignore_pins: Vec<String>,

    /// Where pin expiries are persisted
    #[serde(default = "default_pin_state_path")]
    pub pin_state_path: PathBuf,

    /// Also unpin recursive pins the indexer does not track
    #[serde(default)]
    pub sweep_untracked_pins: bool,
}

impl IpfsNodeConfig {
    /// Base URL of the RPC API
    pub fn api_url(&self) -> String {
        format!("http://{}:{}", self.api_host, self.api_port)
    }

    /// Per-request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.api_host.is_empty() {
            return Err(crate::Error::config("ipfsnode.api_host cannot be empty"));
        }
        if self.api_port == 0 {
            return Err(crate::Error::config("ipfsnode.api_port must be > 0"));
        }
        if self.timeout_ms == 0 {
            return Err(crate::Error::config("ipfsnode.timeout_ms must be > 0"));
        }
        if self.ipns_key.is_empty() {
            return Err(crate::Error::config("ipfsnode.ipns_key cannot be empty"));
        }
        if self.pin_state_path.as_os_str().is_empty() {
            return Err(crate::Error::config(
                "ipfsnode.pin_state_path cannot be empty",
            ));
        }
        Ok(())
    }
}

impl Default for IpfsNodeConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            api_port: default_api_port(),
            timeout_ms: default_timeout_ms(),
            ipns_key: default_ipns_key(),
            ipns_lifetime: default_ipns_lifetime(),
            ipns_ttl: default_ipns_ttl(),
            ignore_pins: Vec::new(),
            pin_state_path: default_pin_state_path(),
            sweep_untracked_pins: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rippled_host() -> String {
    "localhost".to_string()
}

fn default_rippled_port() -> u16 {
    6006
}

fn default_max_message_mib() -> usize {
    1024
}

fn default_create_index_ms() -> u64 {
    300_000
}

fn default_freq_index_check_ms() -> u64 {
    30_000
}

fn default_file_path() -> PathBuf {
    PathBuf::from("records")
}

fn default_remove_indexes_secs() -> u64 {
    3600
}

fn default_page_limit() -> u32 {
    200_000
}

fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
    5001
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_ipns_key() -> String {
    "ledger-index".to_string()
}

fn default_ipns_lifetime() -> String {
    "24h".to_string()
}

fn default_ipns_ttl() -> String {
    "1m".to_string()
}

fn default_pin_state_path() -> PathBuf {
    PathBuf::from("pins.json")
}

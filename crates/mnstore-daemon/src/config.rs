//! Configuration file management.
//!
//! `config.toml` lives in the data directory. Every field has a default and
//! a missing file means all defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use mnstore_node::{PeerListing, ReplicationParams, TaskIntervals};
use mnstore_transport::quic::QuicConfig;
use mnstore_transport::RpcLimits;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "MNSTORE_DATA_DIR";

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network identity and listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Ed25519 secret key file. Empty = $data_dir/identity.key.
    #[serde(default)]
    pub identity_file: String,
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// Persistent chunk tree. Empty = $data_dir/chunks.
    #[serde(default)]
    pub chunk_dir: String,
    /// Temporary chunk tree. Empty = $data_dir/tmp_chunks.
    #[serde(default)]
    pub tmp_dir: String,
    /// Permission bits for created directories.
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
}

/// Replication and background task tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_replication_factor")]
    pub replication_factor: usize,
    #[serde(default = "default_chunk_fetch_parallelism")]
    pub chunk_fetch_parallelism: usize,
    #[serde(default = "default_refetch_cooldown_secs")]
    pub refetch_cooldown_secs: u64,
    #[serde(default = "default_max_fetch_attempts")]
    pub max_fetch_attempts: u32,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_fetcher_idle_secs")]
    pub fetcher_idle_secs: u64,
    #[serde(default = "default_audit_interval_secs")]
    pub audit_interval_secs: u64,
    #[serde(default = "default_tmp_sweep_interval_secs")]
    pub tmp_sweep_interval_secs: u64,
    #[serde(default = "default_one_sec")]
    pub index_interval_secs: u64,
    #[serde(default = "default_one_sec")]
    pub peer_refresh_interval_secs: u64,
    #[serde(default = "default_one_sec")]
    pub ticket_poll_interval_secs: u64,
    #[serde(default = "default_redundancy_factor")]
    pub redundancy_factor: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

/// Incoming message limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_timestamp_window_secs")]
    pub timestamp_window_secs: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u32,
}

/// Built-in static ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub static_peers: Vec<PeerListing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub log_file: String,
}

// Default value functions

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4444))
}

fn default_dir_mode() -> u32 {
    mnstore_storage::DEFAULT_DIR_MODE
}

fn default_replication_factor() -> usize {
    mnstore_types::DEFAULT_REPLICATION_FACTOR
}

fn default_chunk_fetch_parallelism() -> usize {
    mnstore_types::DEFAULT_CHUNK_FETCH_PARALLELISM
}

fn default_refetch_cooldown_secs() -> u64 {
    mnstore_types::DEFAULT_REFETCH_COOLDOWN_SECS
}

fn default_max_fetch_attempts() -> u32 {
    mnstore_types::DEFAULT_MAX_FETCH_ATTEMPTS
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fetcher_idle_secs() -> u64 {
    10
}

fn default_audit_interval_secs() -> u64 {
    60
}

fn default_tmp_sweep_interval_secs() -> u64 {
    5
}

fn default_one_sec() -> u64 {
    1
}

fn default_redundancy_factor() -> u32 {
    mnstore_types::DEFAULT_REDUNDANCY_FACTOR
}

fn default_chunk_size() -> usize {
    mnstore_types::CHUNK_SIZE
}

fn default_max_message_size() -> usize {
    mnstore_transport::envelope::DEFAULT_MAX_MESSAGE_SIZE
}

fn default_timestamp_window_secs() -> u64 {
    mnstore_transport::envelope::DEFAULT_TIMESTAMP_WINDOW_SECS
}

fn default_idle_timeout_ms() -> u32 {
    mnstore_transport::quic::DEFAULT_IDLE_TIMEOUT_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            identity_file: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            chunk_dir: String::new(),
            tmp_dir: String::new(),
            dir_mode: default_dir_mode(),
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replication_factor: default_replication_factor(),
            chunk_fetch_parallelism: default_chunk_fetch_parallelism(),
            refetch_cooldown_secs: default_refetch_cooldown_secs(),
            max_fetch_attempts: default_max_fetch_attempts(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetcher_idle_secs: default_fetcher_idle_secs(),
            audit_interval_secs: default_audit_interval_secs(),
            tmp_sweep_interval_secs: default_tmp_sweep_interval_secs(),
            index_interval_secs: default_one_sec(),
            peer_refresh_interval_secs: default_one_sec(),
            ticket_poll_interval_secs: default_one_sec(),
            redundancy_factor: default_redundancy_factor(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            timestamp_window_secs: default_timestamp_window_secs(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: String::new(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    pub fn chunk_dir(&self) -> PathBuf {
        self.path_or(&self.storage.chunk_dir, "chunks")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.path_or(&self.storage.tmp_dir, "tmp_chunks")
    }

    pub fn identity_path(&self) -> PathBuf {
        self.path_or(&self.node.identity_file, "identity.key")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("mnstore.db")
    }

    fn path_or(&self, configured: &str, default_name: &str) -> PathBuf {
        if configured.is_empty() {
            self.data_dir().join(default_name)
        } else {
            PathBuf::from(configured)
        }
    }

    pub fn replication_params(&self) -> ReplicationParams {
        let r = &self.replication;
        ReplicationParams {
            replication_factor: r.replication_factor,
            chunk_fetch_parallelism: r.chunk_fetch_parallelism,
            refetch_cooldown: Duration::from_secs(r.refetch_cooldown_secs),
            max_fetch_attempts: r.max_fetch_attempts,
            fetch_timeout: Duration::from_secs(r.fetch_timeout_secs),
            redundancy_factor: r.redundancy_factor,
            chunk_size: r.chunk_size,
            ..ReplicationParams::default()
        }
    }

    pub fn task_intervals(&self) -> TaskIntervals {
        let r = &self.replication;
        TaskIntervals {
            peer_refresh: Duration::from_secs(r.peer_refresh_interval_secs),
            ticket_poll: Duration::from_secs(r.ticket_poll_interval_secs),
            index: Duration::from_secs(r.index_interval_secs),
            tmp_sweep: Duration::from_secs(r.tmp_sweep_interval_secs),
            fetcher_idle: Duration::from_secs(r.fetcher_idle_secs),
            audit: Duration::from_secs(r.audit_interval_secs),
        }
    }

    pub fn rpc_limits(&self) -> RpcLimits {
        RpcLimits {
            max_message_size: self.rpc.max_message_size,
            timestamp_window_secs: self.rpc.timestamp_window_secs,
        }
    }

    pub fn quic_config(&self) -> QuicConfig {
        QuicConfig {
            bind_addr: self.node.listen_addr,
            idle_timeout_ms: self.rpc.idle_timeout_ms,
            max_message_size: self.rpc.max_message_size,
            ..QuicConfig::default()
        }
    }

    fn config_path() -> PathBuf {
        // Check env var override first
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/mnstore")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".mnstore")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/mnstore"))
}

//! Configuration loading for tinkerer-server.
//!
//! Configuration is loaded from a TOML file (default: `tinkerer.toml`).

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for tinkerer-server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Operation dispatch and queueing configuration.
    #[serde(default)]
    pub operations: OperationsConfig,
    /// Heartbeat monitor configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// Queue sweep task configuration.
    #[serde(default)]
    pub sweep: SweepConfig,
    /// HTTP surface configuration.
    #[serde(default)]
    pub http: HttpConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the combined HTTP/WebSocket listener.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Operation dispatch and queueing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationsConfig {
    /// End-to-end operation timeout in seconds (default: 300).
    ///
    /// Heartbeat probes wait half of this for a PING answer.
    #[serde(default = "default_operation_timeout_secs")]
    pub timeout_secs: u64,
    /// Fallback poll interval in milliseconds for consumers waiting on
    /// fragments (default: 1000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum buffered bytes per operation queue entry (default: 1MB).
    ///
    /// Fragments past this point are rejected and the operation fails.
    #[serde(default = "default_max_queue_content_bytes")]
    pub max_queue_content_bytes: usize,
    /// Seconds without a new fragment before an operation counts as stale
    /// (default: 600).
    #[serde(default = "default_stale_timeout_secs")]
    pub stale_update_timeout_secs: u64,
    /// Seconds without a consumer read before an operation counts as
    /// abandoned (default: 600).
    #[serde(default = "default_stale_timeout_secs")]
    pub stale_consume_timeout_secs: u64,
    /// Login user recorded for instances whose provider resolves none.
    #[serde(default = "default_instance_user")]
    pub default_instance_user: String,
}

/// Heartbeat monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Enable the heartbeat monitor (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Probe period in seconds (default: 60).
    #[serde(default = "default_heartbeat_interval_secs")]
    pub interval_secs: u64,
    /// Maximum concurrent PING probes across all agents (default: 10).
    #[serde(default = "default_max_concurrent_probes")]
    pub max_concurrent_probes: usize,
}

/// Queue sweep task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Enable the periodic queue sweep (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Sweep period in seconds (default: 30).
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

/// HTTP surface configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable the metrics endpoint (default: true).
    #[serde(default = "default_enabled")]
    pub metrics_enabled: bool,
}

impl OperationsConfig {
    /// End-to-end operation timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Fallback poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Stale-update timeout as a [`Duration`].
    pub fn stale_update_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_update_timeout_secs)
    }

    /// Stale-consume timeout as a [`Duration`].
    pub fn stale_consume_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_consume_timeout_secs)
    }
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_operation_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_queue_content_bytes() -> usize {
    1024 * 1024 // 1MB
}

fn default_stale_timeout_secs() -> u64 {
    600
}

fn default_instance_user() -> String {
    "ubuntu".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_max_concurrent_probes() -> usize {
    10
}

fn default_sweep_interval_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_operation_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_queue_content_bytes: default_max_queue_content_bytes(),
            stale_update_timeout_secs: default_stale_timeout_secs(),
            stale_consume_timeout_secs: default_stale_timeout_secs(),
            default_instance_user: default_instance_user(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_heartbeat_interval_secs(),
            max_concurrent_probes: default_max_concurrent_probes(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_enabled(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            operations: OperationsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            sweep: SweepConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

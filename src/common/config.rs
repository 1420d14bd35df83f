//! Configuration for minidfs components
//!
//! Values come from an optional `minidfs.toml` (or an explicit path) layered under
//! `MINIDFS__*` environment variables, e.g. `MINIDFS__DATA_NODE__DATA_PATH=/srv/blocks`.
//! Binaries apply their command-line flags on top.

use crate::protocol::frame::MAX_FRAME_LEN_LIMIT;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Logging level, used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub data_node: DataNodeConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            coordinator: CoordinatorConfig::default(),
            data_node: DataNodeConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

fn default_max_frame_len() -> usize {
    1024 * 1024
}

fn default_io_timeout_ms() -> u64 {
    30_000
}

fn default_max_block_len() -> u64 {
    1 << 30
}

fn default_register_attempts() -> usize {
    5
}

fn default_register_backoff_ms() -> u64 {
    200
}

/// Convert a millisecond setting into a timeout, where `0` means "wait forever"
fn timeout_from_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Metadata coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Listen address for client and data node requests
    pub bind_addr: SocketAddr,

    /// Directory store path (sled)
    pub db_path: PathBuf,

    /// Largest control frame accepted, in bytes
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    /// Idle deadline for each individual read or write; 0 disables
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl CoordinatorConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.io_timeout_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            db_path: PathBuf::from("./meta-data"),
            max_frame_len: default_max_frame_len(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

/// Data node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataNodeConfig {
    /// Listen address for block transfers
    pub bind_addr: SocketAddr,

    /// Address registered with the coordinator, if it differs from the bind address
    /// (e.g. binding 0.0.0.0 but advertising a routable host name)
    #[serde(default)]
    pub advertise_addr: Option<String>,

    /// Root directory for block storage
    pub data_path: PathBuf,

    /// Coordinator address (`host:port`)
    pub coordinator_addr: String,

    /// Registration attempts before startup fails
    #[serde(default = "default_register_attempts")]
    pub register_attempts: usize,

    /// Initial delay between registration attempts (doubles each retry)
    #[serde(default = "default_register_backoff_ms")]
    pub register_backoff_ms: u64,

    /// Largest chunk accepted by a single PUT, in bytes
    #[serde(default = "default_max_block_len")]
    pub max_block_len: u64,

    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl DataNodeConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.io_timeout_ms)
    }

    pub fn register_backoff(&self) -> Duration {
        Duration::from_millis(self.register_backoff_ms)
    }
}

impl Default for DataNodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            advertise_addr: None,
            data_path: PathBuf::from("./node-data"),
            coordinator_addr: "127.0.0.1:8000".to_string(),
            register_attempts: default_register_attempts(),
            register_backoff_ms: default_register_backoff_ms(),
            max_block_len: default_max_block_len(),
            max_frame_len: default_max_frame_len(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Coordinator address (`host:port`)
    pub coordinator_addr: String,

    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,

    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(coordinator_addr: impl Into<String>) -> Self {
        Self {
            coordinator_addr: coordinator_addr.into(),
            ..Default::default()
        }
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        timeout_from_ms(self.io_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: "127.0.0.1:8000".to_string(),
            max_frame_len: default_max_frame_len(),
            io_timeout_ms: default_io_timeout_ms(),
        }
    }
}

impl Config {
    /// Load `minidfs.toml` from the working directory (if present) plus environment overrides
    pub fn load() -> crate::Result<Self> {
        Self::build(config::File::with_name("minidfs").required(false))
    }

    /// Load an explicit config file plus environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> crate::Result<Self> {
        Self::build(config::File::from(path.as_ref()).required(true))
    }

    fn build<S>(file: S) -> crate::Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("MINIDFS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.data_node.register_attempts == 0 {
            return Err(crate::Error::InvalidConfig(
                "data_node.register_attempts must be at least 1".into(),
            ));
        }
        if self.data_node.max_block_len == 0 {
            return Err(crate::Error::InvalidConfig(
                "data_node.max_block_len must be at least 1".into(),
            ));
        }
        for (section, len) in [
            ("coordinator", self.coordinator.max_frame_len),
            ("data_node", self.data_node.max_frame_len),
            ("client", self.client.max_frame_len),
        ] {
            if len < 64 {
                return Err(crate::Error::InvalidConfig(format!(
                    "{}.max_frame_len too small: {}",
                    section, len
                )));
            }
            if len > MAX_FRAME_LEN_LIMIT {
                return Err(crate::Error::InvalidConfig(format!(
                    "{}.max_frame_len {} exceeds the {}-byte frame limit",
                    section, len, MAX_FRAME_LEN_LIMIT
                )));
            }
        }
        Ok(())
    }
}

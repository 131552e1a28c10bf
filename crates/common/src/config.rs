use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::types::Username;

/// Network protocol constants
pub mod protocol {
    /// Well-known port every peer listens on for direct deliveries
    pub const DEFAULT_PEER_PORT: u16 = 8082;

    /// Default port of the rendezvous directory service
    pub const DEFAULT_RENDEZVOUS_PORT: u16 = 8081;

    /// Maximum wire frame size (1 MB)
    pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

    /// Deadline for a single directory lookup round trip
    pub const LOOKUP_TIMEOUT_SECS: u64 = 10;

    /// Idle timeout before a transport connection is dropped
    pub const IDLE_TIMEOUT_SECS: u64 = 60;

    /// Keep-alive interval on persistent connections
    pub const KEEPALIVE_INTERVAL_SECS: u64 = 5;
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity under which this node publishes its public key
    pub username: Username,

    /// Address of the rendezvous directory service, `host:port`
    pub rendezvous_addr: String,

    /// Port this node listens on, and the port it targets on peers
    pub peer_port: u16,

    /// Directory for persisted key material
    pub data_dir: String,

    /// Directory lookup deadline in seconds
    pub lookup_timeout_secs: u64,
}

impl NodeConfig {
    pub fn new(username: Username) -> Self {
        Self {
            username,
            rendezvous_addr: format!("127.0.0.1:{}", protocol::DEFAULT_RENDEZVOUS_PORT),
            peer_port: protocol::DEFAULT_PEER_PORT,
            data_dir: "./data".to_string(),
            lookup_timeout_secs: protocol::LOOKUP_TIMEOUT_SECS,
        }
    }

    pub fn with_rendezvous_addr(mut self, addr: impl Into<String>) -> Self {
        self.rendezvous_addr = addr.into();
        self
    }

    pub fn with_peer_port(mut self, port: u16) -> Self {
        self.peer_port = port;
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout_secs = timeout.as_secs();
        self
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &PathBuf) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}

//! Configuration module
//!
//! Handles loading and saving Burrow configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::network::NetworkConfig;
use crate::protocol::{DEFAULT_PORT, MAX_DATAGRAM_SIZE};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Peer servers (reserved for replication, currently unused)
    #[serde(default)]
    pub peers: Vec<String>,

    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Client settings
    #[serde(default)]
    pub client: ClientConfig,
}

/// General configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Interface to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Maximum datagram size in bytes
    #[serde(default = "default_max_datagram_size")]
    pub max_datagram_size: usize,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_max_datagram_size() -> usize {
    MAX_DATAGRAM_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            max_datagram_size: default_max_datagram_size(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server to talk to, as `host` or `host:port`
    #[serde(default = "default_server")]
    pub server: String,
    /// Reply timeout in ms
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_server() -> String {
    "127.0.0.1".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location
    pub fn load_default() -> ConfigResult<Self> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("burrow/config.toml")),
            Some(PathBuf::from("./burrow.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the wire format cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        let size = self.server.max_datagram_size;
        if !(MIN_DATAGRAM_SIZE..=MAX_UDP_PAYLOAD).contains(&size) {
            return Err(ConfigError::Invalid(format!(
                "server.max_datagram_size must be between {} and {}, got {}",
                MIN_DATAGRAM_SIZE, MAX_UDP_PAYLOAD, size
            )));
        }
        Ok(())
    }

    /// Network settings for the server
    pub fn server_network(&self) -> NetworkConfig {
        NetworkConfig::new(self.server.port)
            .with_bind_address(self.server.bind_address.clone())
            .with_max_datagram_size(self.server.max_datagram_size)
            .with_peers(self.peers.clone())
    }

    /// Network settings for the client
    pub fn client_network(&self) -> NetworkConfig {
        NetworkConfig::new(self.server.port)
            .with_max_datagram_size(self.server.max_datagram_size)
            .with_request_timeout_ms(self.client.request_timeout_ms)
    }
}

/// Smallest datagram that can carry a GetData reply with some data
const MIN_DATAGRAM_SIZE: usize = 256;

/// Largest payload a UDP datagram can carry
const MAX_UDP_PAYLOAD: usize = 65_507;

/// Sample configuration with a couple of peers filled in
pub fn sample_config() -> Config {
    Config {
        server: ServerConfig {
            port: 12000,
            ..Default::default()
        },
        peers: vec!["127.0.0.1:12001".to_string(), "127.0.0.1:12002".to_string()],
        ..Default::default()
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config() -> ConfigResult<String> {
    Ok(toml::to_string_pretty(&sample_config())?)
}

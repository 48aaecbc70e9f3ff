//! Configuration management for Ferry.
//!
//! This module handles loading, saving, and managing configuration for both
//! the server and client components. Configuration is stored in TOML format;
//! command-line flags override the values loaded here.

use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Default UDP port for both roles.
pub const DEFAULT_PORT: u16 = 2080;
/// Default server address for the client and bind address for the server.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";
/// Where the receiver materializes incoming files by default.
pub const DEFAULT_OUTPUT_DIRECTORY: &str = ".";

/// Main configuration structure containing both role configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server (receiver) configuration.
    pub server: ServerConfig,
    /// Client (sender) configuration.
    pub client: ClientConfig,
}

/// Configuration for the receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub output_directory: String,
    /// Worker threads for the writer pool; defaults to the hardware thread
    /// count when unset.
    pub workers: Option<usize>,
}

/// Configuration for the sender.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_address: String,
    pub server_port: u16,
    pub progress_bar_enabled: bool,
}

impl Config {
    /// Loads configuration from a file, or creates a new default
    /// configuration if the file doesn't exist.
    pub fn load_or_create(path: &PathBuf) -> Result<Self, TransferError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to a file in TOML format.
    pub fn save(&self, path: &PathBuf) -> Result<(), TransferError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            output_directory: DEFAULT_OUTPUT_DIRECTORY.to_string(),
            workers: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: DEFAULT_ADDRESS.to_string(),
            server_port: DEFAULT_PORT,
            progress_bar_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.server.address, DEFAULT_ADDRESS);
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.server.output_directory, DEFAULT_OUTPUT_DIRECTORY);
        assert_eq!(config.server.workers, None);
        assert_eq!(config.client.server_address, DEFAULT_ADDRESS);
        assert_eq!(config.client.server_port, DEFAULT_PORT);
        assert!(config.client.progress_bar_enabled);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(config.server.address, deserialized.server.address);
        assert_eq!(config.server.port, deserialized.server.port);
        assert_eq!(
            config.client.server_address,
            deserialized.client.server_address
        );
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("test_config.toml");

        let mut original = Config::default();
        original.server.port = 9000;
        original.server.workers = Some(4);
        original.save(&config_path).unwrap();

        let loaded = Config::load_or_create(&config_path).unwrap();
        assert_eq!(loaded.server.port, 9000);
        assert_eq!(loaded.server.workers, Some(4));
    }

    #[test]
    fn test_config_create_new() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("new_config.toml");

        let config = Config::load_or_create(&config_path).unwrap();

        assert!(config_path.exists());
        assert_eq!(config.server.address, DEFAULT_ADDRESS);
        assert_eq!(config.server.port, DEFAULT_PORT);
    }
}

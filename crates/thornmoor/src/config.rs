//! Configuration management for the Thornmoor world server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thornmoor_event_system::LocationId;
use tracing::info;
use world_server::{RelayConfig, ServerConfig};

fn default_max_connections() -> usize {
    1000
}

/// Default for connection_timeout
pub fn default_connection_timeout() -> u64 {
    300
}

fn default_grace_window() -> u64 {
    60
}

/// Default tick interval for serde deserialization
fn default_tick_interval() -> u64 {
    1000
}

fn default_relay_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_publish_timeout() -> u64 {
    250
}

fn default_world_file() -> String {
    "world.toml".to_string()
}

fn default_start_location() -> String {
    "town_square".to_string()
}

/// Application configuration loaded from TOML file.
///
/// This is the main configuration structure that encompasses all server
/// settings including networking, the world definition, the relay, and
/// logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// World definition settings
    #[serde(default)]
    pub world: WorldSettings,
    /// Inter-process relay settings
    #[serde(default)]
    pub relay: RelaySettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls network binding, connection limits, timeouts, and the
/// reconnect grace window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:4000")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle/liveness timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Reconnect grace window in seconds after an unintentional disconnect
    #[serde(default = "default_grace_window")]
    pub grace_window: u64,
    /// Server tick interval in milliseconds (0 to disable the idle sweep)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

/// World definition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldSettings {
    /// Path to the world definition file
    #[serde(default = "default_world_file")]
    pub file: String,
    /// Location new actors are placed in when they enter the world
    #[serde(default = "default_start_location")]
    pub start_location: String,
}

/// Inter-process relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Whether to route events through the relay broker
    #[serde(default)]
    pub enabled: bool,
    /// Relay broker URL
    #[serde(default = "default_relay_url")]
    pub url: String,
    /// Bound on a single publish before the in-process fallback engages
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_ms: u64,
}

/// Logging system configuration.
///
/// Controls log output format, levels, and destination settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Optional file path for log output (None means stdout only)
    pub file_path: Option<String>,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            file: default_world_file(),
            start_location: default_start_location(),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_relay_url(),
            publish_timeout_ms: default_publish_timeout(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:4000".to_string(),
                max_connections: 1000,
                connection_timeout: 300,
                grace_window: 60,
                tick_interval_ms: 1000,
            },
            world: WorldSettings::default(),
            relay: RelaySettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading or
    /// creation failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config file
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to a world server
    /// configuration.
    ///
    /// # Returns
    ///
    /// A `ServerConfig` instance ready for use with the world server.
    pub fn to_server_config(&self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        Ok(ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            max_connections: self.server.max_connections,
            connection_timeout: self.server.connection_timeout,
            grace_window: self.server.grace_window,
            tick_interval_ms: self.server.tick_interval_ms,
            start_location: LocationId::from(self.world.start_location.as_str()),
            relay: RelayConfig {
                enabled: self.relay.enabled,
                url: self.relay.url.clone(),
                publish_timeout_ms: self.relay.publish_timeout_ms,
            },
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string
    /// describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        // Validate bind address
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.max_connections == 0 {
            return Err("server.max_connections must be greater than 0".to_string());
        }

        // Validate world settings
        if self.world.file.is_empty() {
            return Err("World definition file cannot be empty".to_string());
        }
        if self.world.start_location.is_empty() {
            return Err("Start location cannot be empty".to_string());
        }

        // Validate relay settings
        if self.relay.enabled {
            if self.relay.url.is_empty() {
                return Err("Relay URL cannot be empty when the relay is enabled".to_string());
            }
            if self.relay.publish_timeout_ms == 0 {
                return Err(
                    "relay.publish_timeout_ms must be greater than 0 when enabled".to_string()
                );
            }
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        let server_config = config
            .to_server_config()
            .expect("Default config should convert to ServerConfig");
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.grace_window, 60);
        assert!(!server_config.relay.enabled);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = AppConfig::default();

        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());
        config.server.bind_address = "127.0.0.1:4000".to_string();

        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
        config.logging.level = "info".to_string();

        config.relay.enabled = true;
        config.relay.publish_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_creates_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let config = AppConfig::load_from_file(&path).await.expect("load");
        assert!(path.exists());
        assert_eq!(config.server.bind_address, "127.0.0.1:4000");

        // Round-trips through the written file.
        let reloaded = AppConfig::load_from_file(&path).await.expect("reload");
        assert_eq!(reloaded.world.start_location, "town_square");
    }

    #[tokio::test]
    async fn partial_file_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            "[server]\nbind_address = \"0.0.0.0:5000\"\n\n[logging]\nlevel = \"debug\"\njson_format = false\n",
        )
        .await
        .expect("write");

        let config = AppConfig::load_from_file(&path).await.expect("load");
        assert_eq!(config.server.bind_address, "0.0.0.0:5000");
        assert_eq!(config.server.grace_window, 60);
        assert_eq!(config.world.file, "world.toml");
        assert!(!config.relay.enabled);
    }
}

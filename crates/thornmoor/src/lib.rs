//! # Thornmoor World Server - Main Entry Point
//!
//! Persistent multiplayer text-world server with atomic movement, event-driven
//! room broadcasts, and resilient session handling. This entry point handles
//! CLI parsing, configuration loading, and application lifecycle management.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration
//! thornmoor
//!
//! # Specify custom configuration
//! thornmoor --config production.toml
//!
//! # Override specific settings
//! thornmoor --bind 0.0.0.0:4000 --world /opt/thornmoor/world.toml --log-level debug
//!
//! # Bridge events across processes through Redis
//! thornmoor --relay-url redis://127.0.0.1:6379
//!
//! # JSON logging for production
//! thornmoor --json-logs
//! ```
//!
//! ## Configuration
//!
//! The server loads configuration from a TOML file (default: `config.toml`).
//! If the file doesn't exist, a default configuration will be created. The
//! world itself lives in a separate TOML file, also created on first run.
//!
//! ## Signal Handling
//!
//! The server handles graceful shutdown on:
//! - SIGINT (Ctrl+C)
//! - SIGTERM (Unix systems)

use tracing::error;

mod app;
mod cli;
mod config;
mod logging;
mod signals;
mod world;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Main entry point for the Thornmoor World Server.
///
/// Handles the complete application lifecycle including:
/// 1. Command-line argument parsing
/// 2. Configuration loading and validation
/// 3. Logging system initialization
/// 4. Application creation and execution
/// 5. Error handling and cleanup
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
///
/// Note: This function is called from an async context (main with #[tokio::main]),
/// so it should NOT have #[tokio::main] itself.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI arguments first
    let args = CliArgs::parse();

    // Load configuration to get logging settings
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    // Create and run application
    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{LoggingSettings, RelaySettings, ServerSettings, WorldSettings};

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());

        // Test conversion to ServerConfig
        let server_config = config
            .to_server_config()
            .expect("Default config should convert to ServerConfig");
        assert_eq!(server_config.max_connections, 1000);
        assert_eq!(server_config.grace_window, 60);
    }

    #[tokio::test]
    async fn test_config_validation() {
        let mut config = AppConfig::default();

        // Test invalid bind address
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        // Test empty world file
        config.server.bind_address = "127.0.0.1:4000".to_string();
        config.world.file = String::new();
        assert!(config.validate().is_err());

        // Test invalid log level
        config.world.file = "world.toml".to_string();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_parsing() {
        // Test CLI argument structure
        let args = CliArgs {
            config_path: PathBuf::from("test.toml"),
            world_file: Some(PathBuf::from("test_world.toml")),
            bind_address: Some("127.0.0.1:9000".to_string()),
            log_level: Some("debug".to_string()),
            json_logs: true,
            relay_url: None,
        };

        assert_eq!(args.config_path, PathBuf::from("test.toml"));
        assert_eq!(args.world_file, Some(PathBuf::from("test_world.toml")));
        assert_eq!(args.bind_address, Some("127.0.0.1:9000".to_string()));
        assert_eq!(args.log_level, Some("debug".to_string()));
        assert!(args.json_logs);
    }

    #[tokio::test]
    async fn test_application_creation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("test_config.toml");

        // Create a test config file pointing at a world inside the temp dir
        let mut test_config = AppConfig::default();
        test_config.world.file = dir
            .path()
            .join("test_world.toml")
            .to_string_lossy()
            .to_string();
        let toml_content = toml::to_string_pretty(&test_config)
            .expect("Failed to serialize default config to TOML");
        tokio::fs::write(&config_path, toml_content)
            .await
            .expect("Failed to write test config file");

        let loaded = AppConfig::load_from_file(&config_path)
            .await
            .expect("Failed to load test config");
        assert_eq!(loaded.world.file, test_config.world.file);
        assert!(config_path.exists());
    }
}

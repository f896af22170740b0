//! Main application logic and lifecycle management.
//!
//! This module contains the core `Application` struct that orchestrates
//! world loading, server startup, monitoring, and graceful shutdown.

use crate::{
    cli::CliArgs,
    config::AppConfig,
    logging::display_banner,
    signals::{setup_signal_handlers, setup_signal_handlers_silent},
    world::WorldDefinition,
};
use std::path::PathBuf;
use std::sync::Arc;
use thornmoor_event_system::ShutdownState;
use tracing::{error, info, warn};
use world_server::{create_memory_server, WorldServer};

/// Main application struct.
///
/// Manages the complete lifecycle of the Thornmoor server: configuration
/// loading, world loading, server initialization, health monitoring, and
/// graceful shutdown handling.
pub struct Application {
    /// Loaded application configuration
    config: AppConfig,
    /// World server instance
    server: Arc<WorldServer>,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// Loads configuration, applies CLI overrides, validates settings,
    /// loads the world definition, and initializes the world server.
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Load the world definition into the Location Registry
    /// 5. Initialize the world server
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        info!("✅ Configuration loaded successfully from {}", args.config_path.display());

        // Apply CLI overrides
        if let Some(world_file) = args.world_file {
            config.world.file = world_file.to_string_lossy().to_string();
        }

        if let Some(bind_address) = args.bind_address {
            config.server.bind_address = bind_address;
        }

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }

        if args.json_logs {
            config.logging.json_format = true;
        }

        if let Some(relay_url) = args.relay_url {
            config.relay.enabled = true;
            config.relay.url = relay_url;
        }

        // Validate configuration
        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        // Load the world
        let world_path = PathBuf::from(&config.world.file);
        let definition = WorldDefinition::load_from_file(&world_path).await?;
        let registry = definition.build_registry(&config.world.start_location)?;

        // Create the server
        let server_config = config.to_server_config()?;
        let (server, _, _) = create_memory_server(server_config, registry).await;

        info!("🚀 Thornmoor World Server v1.0.0");
        info!(
            "📂 Config: {} | World: {}",
            args.config_path.display(),
            config.world.file
        );

        Ok(Self { config, server })
    }

    /// Runs the application until a shutdown signal arrives.
    ///
    /// Starts the server, sets up a periodic health report, waits for
    /// shutdown signals, and performs graceful cleanup.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Thornmoor World Server Application");

        self.log_configuration_summary();

        let bus = self.server.bus().clone();
        let connections = self.server.connections().clone();

        // Create shutdown state for coordinated shutdown
        let shutdown_state = ShutdownState::new();
        let shutdown_state_for_server = shutdown_state.clone();

        // Start server in background
        let server = self.server.clone();
        let server_handle = tokio::spawn(async move {
            match server.start_with_shutdown_state(shutdown_state_for_server).await {
                Ok(()) => {
                    info!("✅ Server completed successfully");
                }
                Err(e) => {
                    error!("❌ Server error: {:?}", e);
                    std::process::exit(1);
                }
            }
        });

        // Periodic health report
        let monitoring_handle = {
            let bus = bus.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
                let mut last_published = 0u64;
                loop {
                    interval.tick().await;
                    let stats = bus.stats();
                    let events_this_period = stats.events_published - last_published;
                    last_published = stats.events_published;
                    info!(
                        "📊 System Health - {} events/min | {} sessions connected",
                        events_this_period,
                        connections.session_count().await
                    );
                }
            })
        };

        info!("✅ Thornmoor Server is now running!");
        info!(
            "🎮 Ready to accept connections on {}",
            self.config.server.bind_address
        );
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        // Wait for shutdown signal
        let signal_shutdown_state = setup_signal_handlers().await?;

        // A second signal skips the graceful path entirely.
        tokio::spawn(async move {
            if let Err(e) = setup_signal_handlers_silent().await {
                error!("Failed to set up second-signal handler: {e}");
                return;
            }
            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        if signal_shutdown_state.is_shutdown_initiated() {
            shutdown_state.initiate_shutdown();
        }

        info!("🛑 Shutdown signal received, beginning graceful shutdown...");

        monitoring_handle.abort();
        self.server.shutdown();

        info!("⏳ Waiting for server task to complete gracefully...");
        if let Err(e) =
            tokio::time::timeout(tokio::time::Duration::from_secs(8), server_handle).await
        {
            warn!("⏰ Server task did not complete within timeout: {:?}", e);
        } else {
            info!("✅ Server task completed gracefully");
        }

        shutdown_state.complete_shutdown();

        // Final statistics
        let final_stats = bus.stats();
        info!("📊 Final Statistics:");
        info!("  - Events published: {}", final_stats.events_published);
        info!("  - Handler invocations: {}", final_stats.handlers_invoked);

        info!("✅ Thornmoor World Server shutdown complete");
        Ok(())
    }

    /// Logs the configuration summary at startup.
    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  🗺️ World file: {}", self.config.world.file);
        info!("  🚏 Start location: {}", self.config.world.start_location);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!(
            "  ⏱️ Connection timeout: {}s | grace window: {}s",
            self.config.server.connection_timeout, self.config.server.grace_window
        );
        if self.config.relay.enabled {
            info!("  📡 Relay: {}", self.config.relay.url);
        } else {
            info!("  📡 Relay: disabled (in-process delivery)");
        }
    }
}

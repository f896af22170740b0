//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default
//! values used to initialize and customize world-server behavior.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thornmoor_event_system::LocationId;

/// Configuration structure for the world server.
///
/// Contains all parameters the server core needs: network settings,
/// connection limits and timeouts, the reconnect grace window, and the
/// inter-process relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Idle/liveness timeout in seconds; exceeding it is treated as an
    /// unintentional disconnect
    pub connection_timeout: u64,

    /// Reconnect grace window in seconds after an unintentional disconnect
    pub grace_window: u64,

    /// Server tick interval in milliseconds, drives the idle sweeper
    /// (0 to disable)
    pub tick_interval_ms: u64,

    /// Location new actors are placed in when they enter the world
    pub start_location: LocationId,

    /// Inter-process relay settings
    pub relay: RelayConfig,
}

/// Configuration for the inter-process message relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Whether to attempt inter-process fan-out at all. Single-process
    /// deployments leave this off and run on the in-process fallback.
    pub enabled: bool,

    /// Broker URL, e.g. "redis://127.0.0.1:6379"
    pub url: String,

    /// Bound on a single publish before the fallback path engages,
    /// in milliseconds
    pub publish_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:4000".parse().expect("Invalid default bind address"),
            max_connections: 1000,
            connection_timeout: 300,
            grace_window: 60,
            tick_interval_ms: 1000,
            start_location: LocationId::from("town_square"),
            relay: RelayConfig::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".to_string(),
            publish_timeout_ms: 250,
        }
    }
}

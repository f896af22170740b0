//! # World Server - Real-Time Core for a Persistent Multiplayer Text World
//!
//! The runtime foundation of a multiplayer text world: atomic movement of
//! actors between locations, event distribution to connected clients, and
//! session lifecycle with reconnect support.
//!
//! ## Architecture Overview
//!
//! ### Core Components
//!
//! * **Location Registry** - the world graph and every occupant set
//! * **Transfer Service** - the single authority for occupancy changes;
//!   a move commits atomically or not at all
//! * **Event Bus** - synchronous in-process pub/sub between the movement
//!   core and the delivery layer (from `thornmoor_event_system`)
//! * **Connection Manager** - WebSocket sessions, actor bindings, the
//!   location-watcher index, and grace-window reconnects
//! * **Message Relay** - optional Redis bridge routing events between
//!   server processes by subject, with transparent in-process fallback
//!
//! ### Message Flow
//!
//! 1. A command frame (`{ "command": "move", "params": { "direction": … } }`)
//!    arrives on an actor's command session
//! 2. The Transfer Service validates and commits the move, emitting a
//!    paired `ActorLeft`/`ActorEntered` on the event bus
//! 3. The publisher offers each event to the relay; on relay absence or
//!    failure it falls through to direct local delivery
//! 4. The Connection Manager fans the event out to the event-stream
//!    sessions watching the affected location, excluding the mover
//!
//! ## Collaborator Seams
//!
//! Persistence and combat rules live outside this crate behind the
//! [`world::ActorStore`] and [`world::CombatTracker`] traits; in-memory
//! implementations back the standalone server and the tests.

// Re-export core types and functions for easy access
pub use config::{RelayConfig, ServerConfig};
pub use error::ServerError;
pub use server::WorldServer;
pub use utils::create_memory_server;

// Public module declarations
pub mod config;
pub mod connection;
pub mod error;
pub mod messaging;
pub mod server;
pub mod utils;
pub mod world;

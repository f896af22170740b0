//! Server core module.
//!
//! Contains the main server implementation and connection handlers.

pub mod core;
pub mod handlers;

pub use core::WorldServer;

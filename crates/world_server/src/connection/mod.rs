//! Connection management for client sessions.
//!
//! This module contains the session representation and the connection
//! manager that tracks sessions, actor bindings, and the location-watcher
//! index used for event fan-out.

pub mod manager;
pub mod session;

pub use manager::{ConnectionManager, Departure, WatchDelta};
pub use session::{Session, SessionId};

//! # Utility Functions
//!
//! Small helpers shared across the event system and the server crates.

use crate::bus::EventBus;
use std::sync::Arc;

/// Returns the current Unix timestamp in seconds.
///
/// Every event carries a timestamp produced here so all components agree on
/// the generation method.
///
/// # Panics
///
/// Panics if the system clock is set before the Unix epoch, which does not
/// happen on correctly configured systems.
pub fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

/// Creates a new shared event bus.
///
/// The primary factory for the bus: construct it once during process
/// startup and hand the `Arc` to every component that publishes or
/// subscribes, so tests can substitute their own instance.
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}

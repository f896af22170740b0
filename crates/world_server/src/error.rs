//! Error types and handling for the world server.
//!
//! This module defines the error types that can occur during server
//! operations. Movement validation failures are deliberately *not* here:
//! they are expected outcomes with typed reason codes
//! ([`crate::world::MoveError`]) returned to the caller, never errors that
//! unwind past the Transfer Service.

/// Enumeration of possible server errors.
///
/// Categorizes errors into network, relay, and internal server errors to
/// help with debugging and error handling.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or connection issues
    #[error("Network error: {0}")]
    Network(String),

    /// Inter-process relay errors (unreachable broker, publish timeout).
    /// Never escalated to movement callers; the in-process fallback engages
    /// instead.
    #[error("Relay error: {0}")]
    Relay(String),

    /// Internal server errors including persistence and event system issues
    #[error("Internal error: {0}")]
    Internal(String),
}

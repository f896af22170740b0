//! Client-server message handling.
//!
//! Frame types for the command channel, the command router that dispatches
//! them to the world core, and the Redis-backed message relay that carries
//! world events between server processes.

pub mod relay;
pub mod router;
pub mod types;

pub use relay::{MessageRelay, RelayControl};
pub use router::{route_client_command, CommandDisposition};
pub use types::{ClientCommand, ClientHello, CommandResponse, MoveDelta};

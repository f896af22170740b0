//! Message type definitions for client-server communication.
//!
//! Three frame shapes cross the wire: the hello frame that binds a fresh
//! socket to an actor and channel, command frames on the command channel,
//! and the responses the server sends back. Pushed world events use the
//! [`WorldEvent`] wire form directly.
//!
//! [`WorldEvent`]: thornmoor_event_system::WorldEvent

use serde::{Deserialize, Serialize};
use thornmoor_event_system::{ActorId, ChannelKind, LocationId};

/// The first frame a client sends after the WebSocket handshake.
///
/// # Examples
///
/// ```json
/// { "actor_id": "2d4f…", "name": "Brann", "channel": "event_stream" }
/// ```
///
/// Omitting `actor_id` asks the server to mint a fresh identity. Identity
/// is opaque here; verifying it belongs to the caller is a collaborator's
/// concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientHello {
    /// Existing actor identity, or `None` for a new actor.
    #[serde(default)]
    pub actor_id: Option<ActorId>,

    /// Display name used when minting a new actor.
    pub name: String,

    /// Which channel this socket carries.
    pub channel: ChannelKind,
}

/// A command frame sent on the command channel.
///
/// ```json
/// { "command": "move", "params": { "direction": "north" } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCommand {
    /// The command verb.
    pub command: String,

    /// Verb-specific parameters.
    #[serde(default)]
    pub params: serde_json::Value,
}

/// The location change carried by a successful move response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveDelta {
    pub from: LocationId,
    pub to: LocationId,
    pub direction: String,
}

/// The server's reply to a command frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub ok: bool,

    /// User-facing text describing the outcome.
    pub text: String,

    /// Present on a successful move.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<MoveDelta>,
}

impl CommandResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            ok: true,
            text: text.into(),
            delta: None,
        }
    }

    pub fn ok_with_delta(text: impl Into<String>, delta: MoveDelta) -> Self {
        Self {
            ok: true,
            text: text.into(),
            delta: Some(delta),
        }
    }

    pub fn fail(text: impl Into<String>) -> Self {
        Self {
            ok: false,
            text: text.into(),
            delta: None,
        }
    }
}

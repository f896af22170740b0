//! Individual client session representation.
//!
//! A session is one WebSocket connection. An actor usually holds two of
//! them at once: a command session for request/response traffic and an
//! event-stream session for pushed world events.

use std::net::SocketAddr;
use std::time::SystemTime;
use thornmoor_event_system::{ActorId, ChannelKind};

/// Unique identifier for a session, assigned at accept time.
pub type SessionId = usize;

/// Per-connection state tracked by the [`ConnectionManager`].
///
/// A session starts unbound; the client's hello frame binds it to an actor
/// and declares which channel it carries.
///
/// [`ConnectionManager`]: super::ConnectionManager
#[derive(Debug)]
pub struct Session {
    /// The actor bound to this session (`None` until the hello frame).
    pub actor_id: Option<ActorId>,

    /// Which channel this session carries (`None` until the hello frame).
    pub channel: Option<ChannelKind>,

    /// The remote network address of the client.
    pub remote_addr: SocketAddr,

    /// When this session was accepted.
    pub connected_at: SystemTime,

    /// Last time a frame arrived on this session; drives the idle sweep.
    pub last_activity: SystemTime,
}

impl Session {
    pub fn new(remote_addr: SocketAddr) -> Self {
        let now = SystemTime::now();
        Self {
            actor_id: None,
            channel: None,
            remote_addr,
            connected_at: now,
            last_activity: now,
        }
    }

    /// Marks the session as active now.
    pub fn touch(&mut self) {
        self.last_activity = SystemTime::now();
    }

    /// How long the session has been silent.
    pub fn idle_for(&self, now: SystemTime) -> std::time::Duration {
        now.duration_since(self.last_activity)
            .unwrap_or_default()
    }
}

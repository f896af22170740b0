//! # Core Type Definitions
//!
//! Fundamental types used throughout the Thornmoor movement core. Wrapper
//! types keep the two id spaces apart (an [`ActorId`] can never be passed
//! where a [`LocationId`] is expected) and every type serializes to JSON for
//! the wire.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an actor in the world.
///
/// Actors are players and non-player entities alike; anything whose position
/// the movement core tracks. The wrapper around UUID provides type safety so
/// actor ids cannot be confused with other ids in the system.
///
/// # Examples
///
/// ```rust
/// use thornmoor_event_system::ActorId;
///
/// let id = ActorId::new();
/// let parsed = ActorId::parse("550e8400-e29b-41d4-a716-446655440000")?;
/// println!("actor {id}, parsed {parsed}");
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    /// Creates a new random actor ID using UUID v4.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an actor ID from its string representation.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl std::str::FromStr for ActorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a location in the world graph.
///
/// Locations are static content, so their ids are stable content keys
/// (`"town_square"`, `"crypt_instance_7f2"`) rather than generated UUIDs.
/// The newtype keeps them from being mixed up with free-form strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub String);

impl LocationId {
    /// Wraps a content key as a location ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw content key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LocationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compass and vertical directions connecting locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    North,
    South,
    East,
    West,
    Up,
    Down,
    In,
    Out,
}

impl Direction {
    /// The direction a traveller arrives from when moving this way.
    pub fn opposite(self) -> Self {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::In => Direction::Out,
            Direction::Out => Direction::In,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::In => "in",
            Direction::Out => "out",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "north" | "n" => Ok(Direction::North),
            "south" | "s" => Ok(Direction::South),
            "east" | "e" => Ok(Direction::East),
            "west" | "w" => Ok(Direction::West),
            "up" | "u" => Ok(Direction::Up),
            "down" | "d" => Ok(Direction::Down),
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// An actor's posture, which gates movement eligibility.
///
/// Only [`Posture::Standing`] actors may move between locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Posture {
    Standing,
    Sitting,
    Lying,
}

impl Default for Posture {
    fn default() -> Self {
        Posture::Standing
    }
}

impl std::fmt::Display for Posture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Posture::Standing => "standing",
            Posture::Sitting => "sitting",
            Posture::Lying => "lying",
        };
        write!(f, "{s}")
    }
}

/// Classification of a session disconnect.
///
/// Intentional disconnects close immediately with no replay; the other two
/// kinds start the reconnect grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectKind {
    /// The actor asked to leave (voluntary logout).
    Requested,
    /// The transport dropped without a close handshake.
    TransportLost,
    /// The liveness timeout expired with no activity.
    TimedOut,
}

impl DisconnectKind {
    /// True for the disconnect kinds that start a grace window.
    pub fn is_unintentional(self) -> bool {
        !matches!(self, DisconnectKind::Requested)
    }
}

/// Which of an actor's two transport channels a session carries.
///
/// A single actor may own one command-channel session and one event-stream
/// session at the same time; the pair is treated as a unit for subscription
/// purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Bidirectional command/response channel.
    Command,
    /// Server-to-client event push channel.
    EventStream,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_id_round_trips_through_string() {
        let id = ActorId::new();
        let parsed = ActorId::parse(&id.to_string()).expect("valid uuid");
        assert_eq!(id, parsed);
    }

    #[test]
    fn direction_parses_short_and_long_forms() {
        assert_eq!("n".parse::<Direction>().unwrap(), Direction::North);
        assert_eq!("north".parse::<Direction>().unwrap(), Direction::North);
        assert_eq!("NORTH".parse::<Direction>().unwrap(), Direction::North);
        assert!("northwest".parse::<Direction>().is_err());
    }

    #[test]
    fn direction_opposites_pair_up() {
        for direction in [
            Direction::North,
            Direction::South,
            Direction::East,
            Direction::West,
            Direction::Up,
            Direction::Down,
            Direction::In,
            Direction::Out,
        ] {
            assert_eq!(direction.opposite().opposite(), direction);
            assert_ne!(direction.opposite(), direction);
        }
    }

    #[test]
    fn disconnect_kind_classification() {
        assert!(!DisconnectKind::Requested.is_unintentional());
        assert!(DisconnectKind::TransportLost.is_unintentional());
        assert!(DisconnectKind::TimedOut.is_unintentional());
    }
}

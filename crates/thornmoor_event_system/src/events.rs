//! # World Events
//!
//! The closed, tagged union of state-change notifications published by the
//! movement core and its collaborators (combat, chat, admin tooling).
//!
//! Events are immutable once published and fan out to zero or more
//! subscribers. Each variant carries the actor id, the location id(s) it is
//! scoped to, and where echo suppression applies an optional `exclude` actor
//! id so an acting actor does not receive a self-referential copy of its own
//! event.
//!
//! The inter-process subject for an event is derived deterministically here
//! (see [`WorldEvent::subject`]) so every server process computes the same
//! topic name for the same event.

use crate::types::{ActorId, LocationId, Posture};
use serde::{Deserialize, Serialize};

/// Discriminant for [`WorldEvent`], used to key bus subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ActorEntered,
    ActorLeft,
    ActorDied,
    PostureChanged,
    Narrative,
}

impl EventKind {
    /// Stable wire name, also the middle segment of the routing subject.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ActorEntered => "entered",
            EventKind::ActorLeft => "left",
            EventKind::ActorDied => "died",
            EventKind::PostureChanged => "posture",
            EventKind::Narrative => "narrative",
        }
    }
}

/// A state-change notification.
///
/// This is a closed sum type by design: subscribers pattern-match
/// exhaustively, and new kinds of notification are added by extending the
/// enum rather than by runtime type inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorldEvent {
    /// An actor entered `location`. `from` is absent for initial world entry.
    ActorEntered {
        actor: ActorId,
        location: LocationId,
        from: Option<LocationId>,
        /// Actor whose own sessions must not receive this event.
        exclude: Option<ActorId>,
        timestamp: u64,
    },
    /// An actor left `location`. `to` is absent for forced removal
    /// (grace-window expiry, logout).
    ActorLeft {
        actor: ActorId,
        location: LocationId,
        to: Option<LocationId>,
        exclude: Option<ActorId>,
        timestamp: u64,
    },
    /// An actor died in `location`.
    ActorDied {
        actor: ActorId,
        location: LocationId,
        timestamp: u64,
    },
    /// An actor changed posture in `location`.
    PostureChanged {
        actor: ActorId,
        location: LocationId,
        posture: Posture,
        timestamp: u64,
    },
    /// Targeted narrative text for a single actor, e.g. the result line of a
    /// command. Actor-scoped, not location-scoped.
    Narrative {
        actor: ActorId,
        text: String,
        timestamp: u64,
    },
}

impl WorldEvent {
    /// The discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            WorldEvent::ActorEntered { .. } => EventKind::ActorEntered,
            WorldEvent::ActorLeft { .. } => EventKind::ActorLeft,
            WorldEvent::ActorDied { .. } => EventKind::ActorDied,
            WorldEvent::PostureChanged { .. } => EventKind::PostureChanged,
            WorldEvent::Narrative { .. } => EventKind::Narrative,
        }
    }

    /// The acting actor this event describes.
    pub fn actor(&self) -> ActorId {
        match self {
            WorldEvent::ActorEntered { actor, .. }
            | WorldEvent::ActorLeft { actor, .. }
            | WorldEvent::ActorDied { actor, .. }
            | WorldEvent::PostureChanged { actor, .. }
            | WorldEvent::Narrative { actor, .. } => *actor,
        }
    }

    /// The location this event is scoped to, if it is location-scoped.
    pub fn location(&self) -> Option<&LocationId> {
        match self {
            WorldEvent::ActorEntered { location, .. }
            | WorldEvent::ActorLeft { location, .. }
            | WorldEvent::ActorDied { location, .. }
            | WorldEvent::PostureChanged { location, .. } => Some(location),
            WorldEvent::Narrative { .. } => None,
        }
    }

    /// The actor whose sessions must be skipped during fan-out, if any.
    pub fn excluded_actor(&self) -> Option<ActorId> {
        match self {
            WorldEvent::ActorEntered { exclude, .. } | WorldEvent::ActorLeft { exclude, .. } => {
                *exclude
            }
            _ => None,
        }
    }

    /// The inter-process routing subject for this event.
    ///
    /// Location-scoped events map to `world.<type>.<location-id>`;
    /// actor-scoped events map to `actor.<type>.<actor-id>`. Every process
    /// derives the same subject for the same event, which is what lets a
    /// process subscribe to exactly the locations it has live sessions for.
    pub fn subject(&self) -> String {
        match self.location() {
            Some(location) => format!("world.{}.{}", self.kind().as_str(), location),
            None => format!("actor.{}.{}", self.kind().as_str(), self.actor()),
        }
    }

    /// Serializes the event to its JSON wire frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes an event from its JSON wire frame.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

/// Pattern matching all subjects scoped to one location, for use with
/// pattern-based relay subscriptions.
pub fn location_subject_pattern(location: &LocationId) -> String {
    format!("world.*.{location}")
}

/// Pattern matching all subjects scoped to one actor.
pub fn actor_subject_pattern(actor: ActorId) -> String {
    format!("actor.*.{actor}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::current_timestamp;

    fn entered(actor: ActorId) -> WorldEvent {
        WorldEvent::ActorEntered {
            actor,
            location: LocationId::from("town_square"),
            from: Some(LocationId::from("gatehouse")),
            exclude: Some(actor),
            timestamp: current_timestamp(),
        }
    }

    #[test]
    fn subject_is_scoped_by_location() {
        let actor = ActorId::new();
        assert_eq!(entered(actor).subject(), "world.entered.town_square");

        let died = WorldEvent::ActorDied {
            actor,
            location: LocationId::from("crypt"),
            timestamp: 0,
        };
        assert_eq!(died.subject(), "world.died.crypt");
    }

    #[test]
    fn narrative_subject_is_scoped_by_actor() {
        let actor = ActorId::new();
        let event = WorldEvent::Narrative {
            actor,
            text: "You feel a chill.".to_string(),
            timestamp: 0,
        };
        assert_eq!(event.subject(), format!("actor.narrative.{actor}"));
    }

    #[test]
    fn wire_frame_round_trips() {
        let event = entered(ActorId::new());
        let frame = event.to_json().expect("serializes");
        assert!(frame.contains("\"event\":\"actor_entered\""));
        assert_eq!(WorldEvent::from_json(&frame).expect("decodes"), event);
    }

    #[test]
    fn exclusion_only_applies_to_movement_echo() {
        let actor = ActorId::new();
        assert_eq!(entered(actor).excluded_actor(), Some(actor));

        let died = WorldEvent::ActorDied {
            actor,
            location: LocationId::from("crypt"),
            timestamp: 0,
        };
        assert_eq!(died.excluded_actor(), None);
    }

    #[test]
    fn location_pattern_covers_every_event_type() {
        let pattern = location_subject_pattern(&LocationId::from("town_square"));
        assert_eq!(pattern, "world.*.town_square");
    }
}

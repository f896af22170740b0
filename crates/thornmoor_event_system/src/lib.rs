//! # Thornmoor Event System
//!
//! Core types and the in-process event bus for the Thornmoor text-world
//! server. This crate is deliberately free of transport concerns: it defines
//! *what* a state change is, while the server crate decides *who* hears
//! about it and over which wire.
//!
//! ## Key Pieces
//!
//! - [`WorldEvent`] - the closed, tagged union of every state-change
//!   notification the core can emit. Subscribers pattern-match exhaustively;
//!   new kinds are added by extending the enum, never by runtime type
//!   inspection.
//! - [`EventBus`] - synchronous, in-process publish/subscribe with
//!   registration-order delivery and at-most-once, no-history semantics.
//! - [`ActorId`] / [`LocationId`] - wrapper types that keep actor and
//!   location identifiers from being confused with each other.
//! - [`ShutdownState`] - shared flags for coordinating graceful shutdown
//!   across server components.
//!
//! ## Design Principles
//!
//! - **Type safety**: events are strongly typed; id newtypes prevent mixups.
//! - **No hidden globals**: the bus is constructed explicitly at startup and
//!   handed to components by reference, so tests can substitute their own.
//! - **Non-blocking handlers**: `publish` runs handlers inline, in
//!   registration order. Handlers enqueue work; they never perform slow I/O
//!   in the publishing call.

pub mod bus;
pub mod events;
pub mod shutdown;
pub mod types;
pub mod utils;

pub use bus::{EventBus, EventBusStats, SubscriptionHandle};
pub use events::{actor_subject_pattern, location_subject_pattern, EventKind, WorldEvent};
pub use shutdown::ShutdownState;
pub use types::{ActorId, ChannelKind, Direction, DisconnectKind, LocationId, Posture};
pub use utils::{create_event_bus, current_timestamp};

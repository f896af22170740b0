//! World state: the Location Registry and the Transfer Service.
//!
//! All occupancy state lives behind [`LocationRegistry`], and all mutation
//! of it goes through [`TransferService`] - no other component can touch
//! occupant sets directly.

pub mod actors;
pub mod registry;
pub mod transfer;

pub use actors::{ActorRecord, ActorStore, CombatTracker, MemoryActorStore, MemoryCombatTracker};
pub use registry::{Location, LocationFlags, LocationRegistry, RegistryError};
pub use transfer::{MoveError, MoveOutcome, MoveRequest, TransferService};

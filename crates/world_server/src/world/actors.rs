//! Collaborator interfaces consumed by the movement core.
//!
//! The persistence layer owns actors; the core reads and updates only the
//! location-relevant fields (current location id, posture) and treats the
//! rest as opaque. Combat state belongs to an external game-rule system, so
//! it sits behind its own query trait. Both seams are trait objects so tests
//! and the real server can substitute implementations freely.

use crate::error::ServerError;
use async_trait::async_trait;
use std::collections::HashMap;
use thornmoor_event_system::{ActorId, LocationId, Posture};
use tokio::sync::RwLock;

/// The slice of an actor the movement core is allowed to see.
#[derive(Debug, Clone)]
pub struct ActorRecord {
    pub id: ActorId,
    pub name: String,
    /// Persisted current-location field; authoritative under drift.
    pub location: LocationId,
    pub posture: Posture,
    /// Liveness/incapacitation attribute; incapacitated actors cannot move.
    pub alive: bool,
}

impl ActorRecord {
    pub fn new(id: ActorId, name: impl Into<String>, location: impl Into<LocationId>) -> Self {
        Self {
            id,
            name: name.into(),
            location: location.into(),
            posture: Posture::Standing,
            alive: true,
        }
    }
}

/// Persistence interface for actor records.
#[async_trait]
pub trait ActorStore: Send + Sync {
    async fn get_actor(&self, id: ActorId) -> Option<ActorRecord>;

    /// Mints a fresh actor at the given starting location.
    ///
    /// Called when a client's hello frame carries no actor identity.
    async fn create_actor(
        &self,
        name: &str,
        location: &LocationId,
    ) -> Result<ActorRecord, ServerError>;

    /// Persists the actor's new current-location field.
    async fn save_actor_location(
        &self,
        id: ActorId,
        location: &LocationId,
    ) -> Result<(), ServerError>;
}

/// Combat-state query, provided by the combat system.
#[async_trait]
pub trait CombatTracker: Send + Sync {
    async fn in_combat(&self, id: ActorId) -> bool;
}

/// In-memory actor store used by the standalone server and by tests.
#[derive(Debug, Default)]
pub struct MemoryActorStore {
    actors: RwLock<HashMap<ActorId, ActorRecord>>,
}

impl MemoryActorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, record: ActorRecord) {
        self.actors.write().await.insert(record.id, record);
    }

    pub async fn set_posture(&self, id: ActorId, posture: Posture) {
        if let Some(record) = self.actors.write().await.get_mut(&id) {
            record.posture = posture;
        }
    }

    pub async fn set_alive(&self, id: ActorId, alive: bool) {
        if let Some(record) = self.actors.write().await.get_mut(&id) {
            record.alive = alive;
        }
    }

    /// Overwrites the persisted location directly. Test hook for simulating
    /// state drift between the registry and the store.
    pub async fn set_location(&self, id: ActorId, location: LocationId) {
        if let Some(record) = self.actors.write().await.get_mut(&id) {
            record.location = location;
        }
    }
}

#[async_trait]
impl ActorStore for MemoryActorStore {
    async fn get_actor(&self, id: ActorId) -> Option<ActorRecord> {
        self.actors.read().await.get(&id).cloned()
    }

    async fn create_actor(
        &self,
        name: &str,
        location: &LocationId,
    ) -> Result<ActorRecord, ServerError> {
        let record = ActorRecord::new(ActorId::new(), name, location.clone());
        self.actors.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn save_actor_location(
        &self,
        id: ActorId,
        location: &LocationId,
    ) -> Result<(), ServerError> {
        let mut actors = self.actors.write().await;
        let record = actors
            .get_mut(&id)
            .ok_or_else(|| ServerError::Internal(format!("unknown actor {id}")))?;
        record.location = location.clone();
        Ok(())
    }
}

/// In-memory combat flags, flipped by the combat system (or tests).
#[derive(Debug, Default)]
pub struct MemoryCombatTracker {
    fighting: RwLock<HashMap<ActorId, bool>>,
}

impl MemoryCombatTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_in_combat(&self, id: ActorId, fighting: bool) {
        self.fighting.write().await.insert(id, fighting);
    }
}

#[async_trait]
impl CombatTracker for MemoryCombatTracker {
    async fn in_combat(&self, id: ActorId) -> bool {
        self.fighting.read().await.get(&id).copied().unwrap_or(false)
    }
}

//! Transfer Service: the sole authority for moving actors between
//! locations.
//!
//! A move either fully completes or fully fails within one acquisition of
//! the movement lock. The lock is a `tokio::sync::Mutex` held across the
//! persistence await; that is safe for the single-occupancy invariant
//! because every occupancy-mutating path acquires the same lock, so no
//! other movement attempt can interleave at the suspension point.
//!
//! Policy checks run in a fixed order so failure reasons are deterministic:
//! combat block, incapacitation, posture, destination checks, exit
//! existence. On success the service emits exactly one `ActorLeft` followed
//! by exactly one `ActorEntered`, both published inside the lock so global
//! emission order matches global move completion order.

use crate::error::ServerError;
use crate::world::actors::{ActorStore, CombatTracker};
use crate::world::registry::{Location, LocationRegistry, RegistryError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thornmoor_event_system::{
    current_timestamp, ActorId, Direction, EventBus, LocationId, Posture, WorldEvent,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Reason codes for rejected moves.
///
/// These are expected, non-fatal outcomes returned to the caller and
/// surfaced as user-facing text by the command layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveError {
    #[error("you can't go that way")]
    NoSuchExit,

    #[error("you are in combat")]
    BlockedByCombat,

    #[error("you are in no state to move")]
    Incapacitated,

    #[error("you need to stand up first")]
    WrongPosture,

    #[error("you are already there")]
    AlreadyPresent,

    #[error("that place does not exist")]
    DestinationNotFound,

    #[error("no such actor")]
    ActorNotFound,
}

/// An ephemeral movement attempt, constructed per command and discarded
/// after processing.
#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub actor: ActorId,
    pub from: LocationId,
    pub to: LocationId,
    pub direction: Direction,
}

/// What a successful move changed, returned to the command layer so it can
/// render a response without re-querying the registry.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub actor: ActorId,
    pub from: LocationId,
    pub to: LocationId,
    pub direction: Direction,
}

/// The atomic location-transfer service.
///
/// Holds the only lock in the system that spans more than one location's
/// occupant set. Coarse-grained by design: moves are serialized globally,
/// an accepted throughput trade-off since move frequency is low relative to
/// broadcast frequency.
pub struct TransferService {
    registry: Arc<LocationRegistry>,
    actors: Arc<dyn ActorStore>,
    combat: Arc<dyn CombatTracker>,
    bus: Arc<EventBus>,
    /// The movement critical section. Also taken by instance lifecycle
    /// operations so instance teardown cannot race an in-flight move.
    move_lock: Mutex<()>,
}

impl std::fmt::Debug for TransferService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferService")
            .field("locations", &self.registry.len())
            .finish()
    }
}

impl TransferService {
    pub fn new(
        registry: Arc<LocationRegistry>,
        actors: Arc<dyn ActorStore>,
        combat: Arc<dyn CombatTracker>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            actors,
            combat,
            bus,
            move_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<LocationRegistry> {
        &self.registry
    }

    /// Moves an actor through an exit of its current location.
    ///
    /// This is the entry point the command-dispatch layer calls for
    /// `move(actor_id, direction)`. Source and destination are resolved from
    /// the actor's persisted location and the exit map, then validated all
    /// over again inside the critical section.
    pub async fn move_by_exit(
        &self,
        actor_id: ActorId,
        direction: Direction,
    ) -> Result<MoveOutcome, MoveError> {
        let record = self
            .actors
            .get_actor(actor_id)
            .await
            .ok_or(MoveError::ActorNotFound)?;
        let from = record.location.clone();
        let to = self
            .registry
            .resolve_exit(&from, direction)
            .ok_or(MoveError::NoSuchExit)?;
        self.execute(MoveRequest {
            actor: actor_id,
            from,
            to,
            direction,
        })
        .await
    }

    /// Executes a move request.
    ///
    /// Contract: `move(actor_id, from, to) -> success | failure(reason)`.
    /// On success the source occupant set loses the actor, the destination
    /// gains it, the persisted current-location field is updated, and a
    /// left/entered event pair is emitted. On failure nothing is mutated.
    pub async fn execute(&self, request: MoveRequest) -> Result<MoveOutcome, MoveError> {
        let _guard = self.move_lock.lock().await;

        let record = self
            .actors
            .get_actor(request.actor)
            .await
            .ok_or(MoveError::ActorNotFound)?;

        // Re-validate membership in the source inside the lock. If the
        // registry disagrees, re-derive authoritative membership from the
        // persisted record, repair, and check once more before failing.
        if !self.registry.is_occupant(&request.from, request.actor) {
            warn!(
                "⚠️ Occupancy drift for {}: registry says {:?}, store says {}",
                request.actor,
                self.registry.locate_actor(request.actor),
                record.location
            );
            if record.location == request.from {
                self.registry
                    .reseat_actor(request.actor, &request.from)
                    .map_err(|_| MoveError::ActorNotFound)?;
            }
            if !self.registry.is_occupant(&request.from, request.actor) {
                return Err(MoveError::ActorNotFound);
            }
        }

        // Fixed-order policy checks; first failure wins.
        if self.combat.in_combat(request.actor).await {
            return Err(MoveError::BlockedByCombat);
        }
        if !record.alive {
            return Err(MoveError::Incapacitated);
        }
        if record.posture != Posture::Standing {
            return Err(MoveError::WrongPosture);
        }
        if !self.registry.contains(&request.to) {
            return Err(MoveError::DestinationNotFound);
        }
        if request.to == request.from || self.registry.is_occupant(&request.to, request.actor) {
            return Err(MoveError::AlreadyPresent);
        }
        if self.registry.resolve_exit(&request.from, request.direction) != Some(request.to.clone())
        {
            return Err(MoveError::NoSuchExit);
        }

        // All checks passed: mutate, persist, emit. transfer_occupant is a
        // single critical section in the registry, so the membership swap is
        // atomic as observed by everyone else.
        self.registry
            .transfer_occupant(&request.from, &request.to, request.actor)
            .map_err(|e| {
                warn!("⚠️ Occupancy transfer failed after validation: {e}");
                MoveError::ActorNotFound
            })?;

        if let Err(e) = self
            .actors
            .save_actor_location(request.actor, &request.to)
            .await
        {
            // Persistence failed: roll the membership back so no partial
            // mutation escapes the lock.
            warn!("⚠️ Location persist failed for {}: {e}; rolling back", request.actor);
            let _ = self
                .registry
                .transfer_occupant(&request.to, &request.from, request.actor);
            return Err(MoveError::ActorNotFound);
        }

        let timestamp = current_timestamp();
        self.bus.publish(&WorldEvent::ActorLeft {
            actor: request.actor,
            location: request.from.clone(),
            to: Some(request.to.clone()),
            exclude: Some(request.actor),
            timestamp,
        });
        self.bus.publish(&WorldEvent::ActorEntered {
            actor: request.actor,
            location: request.to.clone(),
            from: Some(request.from.clone()),
            exclude: Some(request.actor),
            timestamp,
        });

        debug!(
            "🚶 {} moved {} from {} to {}",
            request.actor, request.direction, request.from, request.to
        );

        Ok(MoveOutcome {
            actor: request.actor,
            from: request.from,
            to: request.to,
            direction: request.direction,
        })
    }

    /// Places an actor into the world for the first time (or after a full
    /// departure). Emits a single `ActorEntered` with no source.
    pub async fn place(&self, actor_id: ActorId, location: &LocationId) -> Result<(), MoveError> {
        let _guard = self.move_lock.lock().await;

        if !self.registry.contains(location) {
            return Err(MoveError::DestinationNotFound);
        }
        if self.registry.is_occupant(location, actor_id) {
            return Err(MoveError::AlreadyPresent);
        }
        self.registry
            .reseat_actor(actor_id, location)
            .map_err(|_| MoveError::DestinationNotFound)?;
        self.actors
            .save_actor_location(actor_id, location)
            .await
            .map_err(|_| MoveError::ActorNotFound)?;

        self.bus.publish(&WorldEvent::ActorEntered {
            actor: actor_id,
            location: location.clone(),
            from: None,
            exclude: Some(actor_id),
            timestamp: current_timestamp(),
        });
        info!("🌍 {} entered the world at {}", actor_id, location);
        Ok(())
    }

    /// Removes an actor from the world: voluntary logout or grace-window
    /// expiry. Emits the implicit `ActorLeft` with no destination.
    pub async fn remove(&self, actor_id: ActorId) -> Result<(), MoveError> {
        let _guard = self.move_lock.lock().await;

        let location = match self.registry.locate_actor(actor_id) {
            Some(location) => location,
            None => return Err(MoveError::ActorNotFound),
        };
        self.registry
            .remove_occupant(&location, actor_id)
            .map_err(|_| MoveError::ActorNotFound)?;

        self.bus.publish(&WorldEvent::ActorLeft {
            actor: actor_id,
            location: location.clone(),
            to: None,
            exclude: None,
            timestamp: current_timestamp(),
        });
        info!("🌍 {} left the world from {}", actor_id, location);
        Ok(())
    }

    /// Creates an instanced location and attaches it to the world graph by
    /// pointing `direction` of `attach_at` into it. Runs under the movement
    /// lock so the new exit appears atomically with the instance.
    pub async fn create_instance(
        &self,
        location: Location,
        attach_at: &LocationId,
        direction: Direction,
    ) -> Result<LocationId, ServerError> {
        let _guard = self.move_lock.lock().await;
        let id = location.id.clone();
        self.registry
            .create_instance(location)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        if let Err(e) = self.registry.remap_exit(attach_at, direction, &id) {
            // Undo the orphan instance; the attach point was bad.
            let _ = self.registry.destroy_instance(&id);
            return Err(ServerError::Internal(e.to_string()));
        }
        info!("🏗️ Instance {} attached at {} {}", id, attach_at, direction);
        Ok(id)
    }

    /// Tears down an empty instanced location. Runs under the movement lock
    /// so teardown cannot race an in-flight move into the instance.
    pub async fn destroy_instance(&self, id: &LocationId) -> Result<(), ServerError> {
        let _guard = self.move_lock.lock().await;
        self.registry
            .destroy_instance(id)
            .map_err(|e| match e {
                RegistryError::StillOccupied(_) => {
                    ServerError::Internal(format!("instance {id} still occupied"))
                }
                other => ServerError::Internal(other.to_string()),
            })?;
        info!("🏗️ Instance {} destroyed", id);
        Ok(())
    }

    /// Re-points an exit under the movement lock.
    pub async fn remap_exit(
        &self,
        id: &LocationId,
        direction: Direction,
        target: &LocationId,
    ) -> Result<(), ServerError> {
        let _guard = self.move_lock.lock().await;
        self.registry
            .remap_exit(id, direction, target)
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::actors::{ActorRecord, MemoryActorStore, MemoryCombatTracker};
    use std::sync::Mutex as StdMutex;
    use thornmoor_event_system::EventKind;

    struct Fixture {
        service: TransferService,
        actors: Arc<MemoryActorStore>,
        combat: Arc<MemoryCombatTracker>,
        bus: Arc<EventBus>,
    }

    /// Two rooms, A -north-> B -south-> A, with the bus and stores wired.
    async fn fixture() -> (Fixture, ActorId) {
        let registry = Arc::new(LocationRegistry::new());
        registry
            .insert(Location::new("a", "Room A").with_exit(Direction::North, "b"))
            .unwrap();
        registry
            .insert(Location::new("b", "Room B").with_exit(Direction::South, "a"))
            .unwrap();

        let actors = Arc::new(MemoryActorStore::new());
        let combat = Arc::new(MemoryCombatTracker::new());
        let bus = Arc::new(EventBus::new());

        let p1 = ActorId::new();
        actors.upsert(ActorRecord::new(p1, "P1", "a")).await;
        registry.add_occupant(&LocationId::from("a"), p1).unwrap();

        let service = TransferService::new(
            registry,
            actors.clone(),
            combat.clone(),
            bus.clone(),
        );
        (
            Fixture {
                service,
                actors,
                combat,
                bus,
            },
            p1,
        )
    }

    fn record_events(bus: &EventBus) -> Arc<StdMutex<Vec<WorldEvent>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        for kind in [EventKind::ActorLeft, EventKind::ActorEntered] {
            let seen = seen.clone();
            bus.subscribe(kind, move |event| {
                seen.lock().unwrap().push(event.clone());
            });
        }
        seen
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn basic_move_updates_both_occupant_sets() {
        let (fx, p1) = fixture().await;
        let seen = record_events(&fx.bus);

        let outcome = fx.service.move_by_exit(p1, Direction::North).await.unwrap();
        assert_eq!(outcome.from, LocationId::from("a"));
        assert_eq!(outcome.to, LocationId::from("b"));

        let registry = fx.service.registry();
        assert!(!registry.is_occupant(&LocationId::from("a"), p1));
        assert!(registry.is_occupant(&LocationId::from("b"), p1));
        assert_eq!(
            fx.actors.get_actor(p1).await.unwrap().location,
            LocationId::from("b")
        );

        let seen = seen.lock().unwrap();
        assert!(matches!(
            &seen[0],
            WorldEvent::ActorLeft { location, .. } if location.as_str() == "a"
        ));
        assert!(matches!(
            &seen[1],
            WorldEvent::ActorEntered { location, .. } if location.as_str() == "b"
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocked_exit_fails_without_mutation() {
        let (fx, p1) = fixture().await;
        let err = fx.service.move_by_exit(p1, Direction::East).await.unwrap_err();
        assert_eq!(err, MoveError::NoSuchExit);
        assert!(fx
            .service
            .registry()
            .is_occupant(&LocationId::from("a"), p1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn combat_block_emits_no_events() {
        let (fx, p1) = fixture().await;
        let seen = record_events(&fx.bus);
        fx.combat.set_in_combat(p1, true).await;

        let err = fx.service.move_by_exit(p1, Direction::North).await.unwrap_err();
        assert_eq!(err, MoveError::BlockedByCombat);
        assert!(seen.lock().unwrap().is_empty());
        assert!(fx
            .service
            .registry()
            .is_occupant(&LocationId::from("a"), p1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn posture_and_liveness_gate_movement() {
        let (fx, p1) = fixture().await;

        fx.actors.set_posture(p1, Posture::Sitting).await;
        assert_eq!(
            fx.service.move_by_exit(p1, Direction::North).await.unwrap_err(),
            MoveError::WrongPosture
        );

        // Incapacitation outranks posture in the fixed check order.
        fx.actors.set_alive(p1, false).await;
        assert_eq!(
            fx.service.move_by_exit(p1, Direction::North).await.unwrap_err(),
            MoveError::Incapacitated
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn move_to_current_location_is_already_present() {
        let (fx, p1) = fixture().await;
        let err = fx
            .service
            .execute(MoveRequest {
                actor: p1,
                from: LocationId::from("a"),
                to: LocationId::from("a"),
                direction: Direction::North,
            })
            .await
            .unwrap_err();
        assert_eq!(err, MoveError::AlreadyPresent);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_destination_is_reported_before_exit_check() {
        let (fx, p1) = fixture().await;
        let err = fx
            .service
            .execute(MoveRequest {
                actor: p1,
                from: LocationId::from("a"),
                to: LocationId::from("nowhere"),
                direction: Direction::North,
            })
            .await
            .unwrap_err();
        assert_eq!(err, MoveError::DestinationNotFound);
    }

    /// Regression test: every successful move delivers the left/entered
    /// pair, in that order, to a single subscriber. Asymmetric delivery
    /// (left without entered) is a bug even when fan-out layers change.
    #[tokio::test(flavor = "multi_thread")]
    async fn paired_left_entered_for_every_move() {
        let (fx, p1) = fixture().await;
        let seen = record_events(&fx.bus);

        for direction in [Direction::North, Direction::South, Direction::North] {
            fx.service.move_by_exit(p1, direction).await.unwrap();
        }

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 6);
        for pair in seen.chunks(2) {
            let left_to = match &pair[0] {
                WorldEvent::ActorLeft { to, .. } => to.clone().expect("move has destination"),
                other => panic!("expected left first, got {other:?}"),
            };
            match &pair[1] {
                WorldEvent::ActorEntered { location, .. } => assert_eq!(*location, left_to),
                other => panic!("expected entered second, got {other:?}"),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_occupancy_holds_after_every_move() {
        let (fx, p1) = fixture().await;
        let registry = fx.service.registry();

        for direction in [Direction::North, Direction::South] {
            fx.service.move_by_exit(p1, direction).await.unwrap();
            let persisted = fx.actors.get_actor(p1).await.unwrap().location;
            assert_eq!(registry.locate_actor(p1), Some(persisted.clone()));
            let memberships = ["a", "b"]
                .iter()
                .filter(|id| registry.is_occupant(&LocationId::from(**id), p1))
                .count();
            assert_eq!(memberships, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drift_is_reconciled_from_persisted_state() {
        let (fx, p1) = fixture().await;
        // Simulate drift: registry lost the membership but the store still
        // says the actor is in A.
        fx.service
            .registry()
            .remove_occupant(&LocationId::from("a"), p1)
            .unwrap();

        let outcome = fx.service.move_by_exit(p1, Direction::North).await.unwrap();
        assert_eq!(outcome.to, LocationId::from("b"));
        assert!(fx
            .service
            .registry()
            .is_occupant(&LocationId::from("b"), p1));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn place_and_remove_emit_single_events() {
        let (fx, _) = fixture().await;
        let seen = record_events(&fx.bus);

        let p2 = ActorId::new();
        fx.actors.upsert(ActorRecord::new(p2, "P2", "a")).await;
        fx.service.place(p2, &LocationId::from("a")).await.unwrap();
        fx.service.remove(p2).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(
            &seen[0],
            WorldEvent::ActorEntered { from: None, .. }
        ));
        assert!(matches!(&seen[1], WorldEvent::ActorLeft { to: None, .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn instance_lifecycle_under_movement_lock() {
        let (fx, p1) = fixture().await;

        let crypt = fx
            .service
            .create_instance(
                Location::new("crypt_1", "Crypt"),
                &LocationId::from("b"),
                Direction::Down,
            )
            .await
            .unwrap();

        // Walk in through the new exit.
        fx.service.move_by_exit(p1, Direction::North).await.unwrap();
        fx.service.move_by_exit(p1, Direction::Down).await.unwrap();
        assert!(fx.service.registry().is_occupant(&crypt, p1));

        // Teardown refuses while occupied.
        assert!(fx.service.destroy_instance(&crypt).await.is_err());

        fx.service
            .remap_exit(&crypt, Direction::Up, &LocationId::from("b"))
            .await
            .unwrap();
        fx.service.move_by_exit(p1, Direction::Up).await.unwrap();
        fx.service.destroy_instance(&crypt).await.unwrap();
        assert!(!fx.service.registry().contains(&crypt));
    }
}

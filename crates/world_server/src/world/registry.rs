//! Location Registry: in-memory locations and their current occupants.
//!
//! The registry owns the world graph (exits, movement/combat flags) and the
//! occupant set of every location. It is guarded by a `std::sync::RwLock`
//! that is never held across an await point; the async movement lock in the
//! Transfer Service serializes the callers that mutate it.
//!
//! The one operation with a correctness subtlety is
//! [`LocationRegistry::transfer_occupant`]: the remove/add pair runs under a
//! single write-lock acquisition, so no reader can ever observe an actor in
//! zero or in two occupant sets, even transiently.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thornmoor_event_system::{ActorId, Direction, LocationId};

/// Boolean attributes of a location relevant to movement/combat policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LocationFlags {
    /// Combat cannot start here.
    #[serde(default)]
    pub no_combat: bool,
    /// Actors cannot die here.
    #[serde(default)]
    pub no_death: bool,
    /// Resting here is effective.
    #[serde(default)]
    pub rest_eligible: bool,
}

/// A discrete place in the world graph.
///
/// Static locations are created at world-load time and never deleted at
/// runtime. Instanced locations (dungeon-style areas) are created and
/// destroyed dynamically with the same invariants; the `instanced` marker
/// only records which lifecycle a location belongs to.
#[derive(Debug, Clone)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub exits: HashMap<Direction, LocationId>,
    pub flags: LocationFlags,
    pub instanced: bool,
    occupants: HashSet<ActorId>,
}

impl Location {
    /// Creates an empty static location.
    pub fn new(id: impl Into<LocationId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            exits: HashMap::new(),
            flags: LocationFlags::default(),
            instanced: false,
            occupants: HashSet::new(),
        }
    }

    /// Builder-style exit declaration, used by world loading and tests.
    pub fn with_exit(mut self, direction: Direction, target: impl Into<LocationId>) -> Self {
        self.exits.insert(direction, target.into());
        self
    }

    /// Builder-style flag assignment.
    pub fn with_flags(mut self, flags: LocationFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Marks the location as dynamically instanced.
    pub fn instanced(mut self) -> Self {
        self.instanced = true;
        self
    }
}

/// Errors from registry-level occupancy and instance operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no such location: {0}")]
    NoSuchLocation(LocationId),

    #[error("actor {actor} is not an occupant of {location}")]
    NotAnOccupant { actor: ActorId, location: LocationId },

    #[error("location {0} already exists")]
    DuplicateLocation(LocationId),

    #[error("location {0} still has occupants")]
    StillOccupied(LocationId),

    #[error("location {0} is not instanced")]
    NotInstanced(LocationId),
}

/// The lock-guarded registry of locations and occupants.
#[derive(Debug, Default)]
pub struct LocationRegistry {
    locations: RwLock<HashMap<LocationId, Location>>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self {
            locations: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a location at world-load time.
    pub fn insert(&self, location: Location) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().expect("registry lock poisoned");
        if locations.contains_key(&location.id) {
            return Err(RegistryError::DuplicateLocation(location.id));
        }
        locations.insert(location.id.clone(), location);
        Ok(())
    }

    pub fn contains(&self, id: &LocationId) -> bool {
        self.locations
            .read()
            .expect("registry lock poisoned")
            .contains_key(id)
    }

    /// Where the exit in `direction` leads from `id`, if it exists.
    pub fn resolve_exit(&self, id: &LocationId, direction: Direction) -> Option<LocationId> {
        self.locations
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .and_then(|l| l.exits.get(&direction).cloned())
    }

    /// All exits of a location, for rendering and command handling.
    pub fn exits(&self, id: &LocationId) -> Vec<(Direction, LocationId)> {
        self.locations
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|l| l.exits.iter().map(|(d, t)| (*d, t.clone())).collect())
            .unwrap_or_default()
    }

    pub fn flags(&self, id: &LocationId) -> Option<LocationFlags> {
        self.locations
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|l| l.flags)
    }

    pub fn name(&self, id: &LocationId) -> Option<String> {
        self.locations
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|l| l.name.clone())
    }

    /// Snapshot of the occupant set of a location.
    pub fn occupants(&self, id: &LocationId) -> Vec<ActorId> {
        self.locations
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|l| l.occupants.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_occupant(&self, id: &LocationId, actor: ActorId) -> bool {
        self.locations
            .read()
            .expect("registry lock poisoned")
            .get(id)
            .map(|l| l.occupants.contains(&actor))
            .unwrap_or(false)
    }

    /// Adds an actor to a location's occupant set (initial placement).
    pub fn add_occupant(&self, id: &LocationId, actor: ActorId) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().expect("registry lock poisoned");
        let location = locations
            .get_mut(id)
            .ok_or_else(|| RegistryError::NoSuchLocation(id.clone()))?;
        location.occupants.insert(actor);
        Ok(())
    }

    /// Removes an actor from a location's occupant set (forced removal).
    pub fn remove_occupant(&self, id: &LocationId, actor: ActorId) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().expect("registry lock poisoned");
        let location = locations
            .get_mut(id)
            .ok_or_else(|| RegistryError::NoSuchLocation(id.clone()))?;
        if !location.occupants.remove(&actor) {
            return Err(RegistryError::NotAnOccupant {
                actor,
                location: id.clone(),
            });
        }
        Ok(())
    }

    /// Moves an actor between two occupant sets in one critical section.
    ///
    /// Both sets are checked before either is touched, so a failure leaves
    /// the registry unchanged and a success is atomic as observed by every
    /// other registry operation.
    pub fn transfer_occupant(
        &self,
        from: &LocationId,
        to: &LocationId,
        actor: ActorId,
    ) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().expect("registry lock poisoned");

        if !locations.contains_key(to) {
            return Err(RegistryError::NoSuchLocation(to.clone()));
        }
        let source = locations
            .get(from)
            .ok_or_else(|| RegistryError::NoSuchLocation(from.clone()))?;
        if !source.occupants.contains(&actor) {
            return Err(RegistryError::NotAnOccupant {
                actor,
                location: from.clone(),
            });
        }

        locations
            .get_mut(from)
            .expect("source checked above")
            .occupants
            .remove(&actor);
        locations
            .get_mut(to)
            .expect("destination checked above")
            .occupants
            .insert(actor);
        Ok(())
    }

    /// Full scan for the location currently holding `actor`.
    ///
    /// Used only by the reconciliation path of the Transfer Service; normal
    /// lookups go through the actor's persisted current-location field.
    pub fn locate_actor(&self, actor: ActorId) -> Option<LocationId> {
        self.locations
            .read()
            .expect("registry lock poisoned")
            .values()
            .find(|l| l.occupants.contains(&actor))
            .map(|l| l.id.clone())
    }

    /// Removes `actor` from whichever occupant sets currently hold it and
    /// inserts it into `into`. Reconciliation repair; see the Transfer
    /// Service's drift handling.
    pub fn reseat_actor(&self, actor: ActorId, into: &LocationId) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().expect("registry lock poisoned");
        if !locations.contains_key(into) {
            return Err(RegistryError::NoSuchLocation(into.clone()));
        }
        for location in locations.values_mut() {
            location.occupants.remove(&actor);
        }
        locations
            .get_mut(into)
            .expect("target checked above")
            .occupants
            .insert(actor);
        Ok(())
    }

    /// Inserts a dynamically-created instanced location.
    pub fn create_instance(&self, location: Location) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().expect("registry lock poisoned");
        if locations.contains_key(&location.id) {
            return Err(RegistryError::DuplicateLocation(location.id));
        }
        let mut location = location;
        location.instanced = true;
        locations.insert(location.id.clone(), location);
        Ok(())
    }

    /// Removes an instanced location. Fails while it still has occupants
    /// and refuses to touch static content.
    pub fn destroy_instance(&self, id: &LocationId) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().expect("registry lock poisoned");
        let location = locations
            .get(id)
            .ok_or_else(|| RegistryError::NoSuchLocation(id.clone()))?;
        if !location.instanced {
            return Err(RegistryError::NotInstanced(id.clone()));
        }
        if !location.occupants.is_empty() {
            return Err(RegistryError::StillOccupied(id.clone()));
        }
        locations.remove(id);
        // Drop dangling exits into the destroyed instance.
        for location in locations.values_mut() {
            location.exits.retain(|_, target| target != id);
        }
        Ok(())
    }

    /// Points (or re-points) an exit of `id` at `target`.
    pub fn remap_exit(
        &self,
        id: &LocationId,
        direction: Direction,
        target: &LocationId,
    ) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().expect("registry lock poisoned");
        if !locations.contains_key(target) {
            return Err(RegistryError::NoSuchLocation(target.clone()));
        }
        let location = locations
            .get_mut(id)
            .ok_or_else(|| RegistryError::NoSuchLocation(id.clone()))?;
        location.exits.insert(direction, target.clone());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.locations.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_room_world() -> LocationRegistry {
        let registry = LocationRegistry::new();
        registry
            .insert(Location::new("a", "Room A").with_exit(Direction::North, "b"))
            .unwrap();
        registry
            .insert(Location::new("b", "Room B").with_exit(Direction::South, "a"))
            .unwrap();
        registry
    }

    #[test]
    fn transfer_moves_exactly_one_membership() {
        let registry = two_room_world();
        let actor = ActorId::new();
        let a = LocationId::from("a");
        let b = LocationId::from("b");

        registry.add_occupant(&a, actor).unwrap();
        registry.transfer_occupant(&a, &b, actor).unwrap();

        assert!(!registry.is_occupant(&a, actor));
        assert!(registry.is_occupant(&b, actor));
        assert_eq!(registry.locate_actor(actor), Some(b));
    }

    #[test]
    fn failed_transfer_leaves_both_sets_unchanged() {
        let registry = two_room_world();
        let actor = ActorId::new();
        let a = LocationId::from("a");
        let b = LocationId::from("b");
        registry.add_occupant(&a, actor).unwrap();

        // Destination missing.
        let err = registry
            .transfer_occupant(&a, &LocationId::from("nowhere"), actor)
            .unwrap_err();
        assert!(matches!(err, RegistryError::NoSuchLocation(_)));
        assert!(registry.is_occupant(&a, actor));

        // Actor not in source.
        let other = ActorId::new();
        let err = registry.transfer_occupant(&a, &b, other).unwrap_err();
        assert!(matches!(err, RegistryError::NotAnOccupant { .. }));
        assert!(registry.occupants(&b).is_empty());
    }

    #[test]
    fn reseat_ends_with_single_membership() {
        let registry = two_room_world();
        let actor = ActorId::new();
        let a = LocationId::from("a");
        let b = LocationId::from("b");

        // Simulate drift: actor somehow present in both sets.
        registry.add_occupant(&a, actor).unwrap();
        registry.add_occupant(&b, actor).unwrap();

        registry.reseat_actor(actor, &a).unwrap();
        assert!(registry.is_occupant(&a, actor));
        assert!(!registry.is_occupant(&b, actor));
    }

    #[test]
    fn instances_create_and_destroy_with_exit_cleanup() {
        let registry = two_room_world();
        let crypt = LocationId::from("crypt_7f2");

        registry
            .create_instance(Location::new("crypt_7f2", "Collapsed Crypt"))
            .unwrap();
        registry
            .remap_exit(&LocationId::from("a"), Direction::Down, &crypt)
            .unwrap();
        assert_eq!(
            registry.resolve_exit(&LocationId::from("a"), Direction::Down),
            Some(crypt.clone())
        );

        // Occupied instances refuse teardown.
        let actor = ActorId::new();
        registry.add_occupant(&crypt, actor).unwrap();
        assert_eq!(
            registry.destroy_instance(&crypt),
            Err(RegistryError::StillOccupied(crypt.clone()))
        );
        registry.remove_occupant(&crypt, actor).unwrap();

        registry.destroy_instance(&crypt).unwrap();
        assert!(!registry.contains(&crypt));
        assert_eq!(
            registry.resolve_exit(&LocationId::from("a"), Direction::Down),
            None
        );
    }

    #[test]
    fn static_locations_cannot_be_destroyed() {
        let registry = two_room_world();
        assert_eq!(
            registry.destroy_instance(&LocationId::from("a")),
            Err(RegistryError::NotInstanced(LocationId::from("a")))
        );
    }
}

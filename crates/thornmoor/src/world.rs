//! World definition loading.
//!
//! Static locations live in a TOML file: id, display name, exits, and
//! movement/combat flags. The file is loaded once at startup into the
//! Location Registry; instanced locations are created at runtime through
//! the Transfer Service and never appear here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thornmoor_event_system::{Direction, LocationId};
use tracing::{info, warn};
use world_server::world::{Location, LocationFlags, LocationRegistry};

/// A single location entry in the world definition file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationDef {
    pub id: String,
    pub name: String,
    /// Direction name -> destination location id
    #[serde(default)]
    pub exits: HashMap<String, String>,
    #[serde(default)]
    pub flags: LocationFlags,
}

/// The world definition file: a list of `[[locations]]` tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldDefinition {
    pub locations: Vec<LocationDef>,
}

impl Default for WorldDefinition {
    fn default() -> Self {
        Self {
            locations: vec![
                LocationDef {
                    id: "town_square".to_string(),
                    name: "Town Square".to_string(),
                    exits: HashMap::from([("north".to_string(), "north_gate".to_string())]),
                    flags: LocationFlags {
                        no_combat: true,
                        no_death: true,
                        rest_eligible: true,
                    },
                },
                LocationDef {
                    id: "north_gate".to_string(),
                    name: "North Gate".to_string(),
                    exits: HashMap::from([("south".to_string(), "town_square".to_string())]),
                    flags: LocationFlags::default(),
                },
            ],
        }
    }
}

impl WorldDefinition {
    /// Loads the world definition from a TOML file.
    ///
    /// If the file doesn't exist, writes a small default world there and
    /// returns it, mirroring how the missing config file is handled.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let definition: WorldDefinition = toml::from_str(&content)?;
            Ok(definition)
        } else {
            let default_world = WorldDefinition::default();
            let toml_content = toml::to_string_pretty(&default_world)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default world file: {}", path.display());
            Ok(default_world)
        }
    }

    /// Builds a populated Location Registry from the definition.
    ///
    /// Every exit must name a known direction and a location defined in
    /// the same file, and `start_location` must exist; a world that fails
    /// these checks refuses to load.
    pub fn build_registry(
        &self,
        start_location: &str,
    ) -> Result<Arc<LocationRegistry>, Box<dyn std::error::Error>> {
        if self.locations.is_empty() {
            return Err("world definition has no locations".into());
        }

        let registry = Arc::new(LocationRegistry::new());
        let mut passages = Vec::new();
        for def in &self.locations {
            let mut location = Location::new(def.id.as_str(), def.name.as_str())
                .with_flags(def.flags);
            for (direction, target) in &def.exits {
                let direction = Direction::from_str(direction)
                    .map_err(|_| format!("location '{}': unknown direction '{direction}'", def.id))?;
                if !self.locations.iter().any(|l| l.id == *target) {
                    return Err(format!(
                        "location '{}': exit {direction} points at undefined location '{target}'",
                        def.id
                    )
                    .into());
                }
                location = location.with_exit(direction, target.as_str());
                passages.push((
                    LocationId::from(def.id.as_str()),
                    direction,
                    LocationId::from(target.as_str()),
                ));
            }
            registry
                .insert(location)
                .map_err(|e| format!("world load failed: {e}"))?;
        }

        if !registry.contains(&start_location.into()) {
            return Err(format!("start location '{start_location}' is not defined").into());
        }

        // One-way passages are legal but usually a typo; surface them.
        for (from, direction, to) in &passages {
            if registry.resolve_exit(to, direction.opposite()).as_ref() != Some(from) {
                warn!("🚧 One-way passage: {from} leads {direction} to {to} with no return exit");
            }
        }

        info!("🗺️ Loaded {} locations", registry.len());
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_world_builds() {
        let registry = WorldDefinition::default()
            .build_registry("town_square")
            .expect("default world should build");
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.resolve_exit(&LocationId::from("town_square"), Direction::North),
            Some(LocationId::from("north_gate"))
        );
        let flags = registry
            .flags(&LocationId::from("town_square"))
            .expect("square exists");
        assert!(flags.no_combat && flags.rest_eligible);
    }

    #[test]
    fn dangling_exit_is_rejected() {
        let mut world = WorldDefinition::default();
        world.locations[0]
            .exits
            .insert("east".to_string(), "nowhere".to_string());
        assert!(world.build_registry("town_square").is_err());
    }

    #[test]
    fn unknown_direction_is_rejected() {
        let mut world = WorldDefinition::default();
        world.locations[0]
            .exits
            .insert("sideways".to_string(), "north_gate".to_string());
        assert!(world.build_registry("town_square").is_err());
    }

    #[test]
    fn one_way_passage_is_allowed() {
        let mut world = WorldDefinition::default();
        world.locations.push(LocationDef {
            id: "oubliette".to_string(),
            name: "The Oubliette".to_string(),
            exits: HashMap::new(),
            flags: LocationFlags::default(),
        });
        world.locations[1]
            .exits
            .insert("down".to_string(), "oubliette".to_string());

        let registry = world
            .build_registry("town_square")
            .expect("one-way exits only warn");
        assert_eq!(
            registry.resolve_exit(&LocationId::from("north_gate"), Direction::Down),
            Some(LocationId::from("oubliette"))
        );
        assert_eq!(
            registry.resolve_exit(&LocationId::from("oubliette"), Direction::Up),
            None
        );
    }

    #[test]
    fn missing_start_location_is_rejected() {
        let world = WorldDefinition::default();
        assert!(world.build_registry("the_moon").is_err());
    }

    #[tokio::test]
    async fn missing_file_creates_default_world() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("world.toml");
        let world = WorldDefinition::load_from_file(&path).await.expect("load");
        assert!(path.exists());
        assert_eq!(world.locations.len(), 2);
    }
}

//! Factory helpers for assembling a server.

use crate::{config::ServerConfig, server::WorldServer, world::LocationRegistry};
use crate::world::{MemoryActorStore, MemoryCombatTracker};
use std::sync::Arc;

/// Creates a world server backed by in-memory actor and combat stores.
///
/// This is the assembly used by the standalone binary and by tests;
/// deployments with real persistence construct [`WorldServer`] directly
/// with their own [`ActorStore`]/[`CombatTracker`] implementations.
///
/// [`ActorStore`]: crate::world::ActorStore
/// [`CombatTracker`]: crate::world::CombatTracker
pub async fn create_memory_server(
    config: ServerConfig,
    registry: Arc<LocationRegistry>,
) -> (Arc<WorldServer>, Arc<MemoryActorStore>, Arc<MemoryCombatTracker>) {
    let actors = Arc::new(MemoryActorStore::new());
    let combat = Arc::new(MemoryCombatTracker::new());
    let server = WorldServer::new(config, registry, actors.clone(), combat.clone()).await;
    (server, actors, combat)
}

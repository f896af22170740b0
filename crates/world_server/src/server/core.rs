//! Core world server implementation.
//!
//! `WorldServer` wires the movement core, the event bus, the connection
//! manager, and the message relay together, runs the accept loop, and owns
//! the two background pumps:
//!
//! * the **publisher** drains bus events, rebinds the mover's watch on
//!   `ActorEntered`, and offers each event to the relay; a declined event
//!   falls through to local delivery
//! * the **delivery pump** drains events from the relay inbound path and
//!   the fallback path and fans them out to local sessions
//!
//! The server core contains no game rules. Movement policy lives in the
//! Transfer Service; everything here is session and routing plumbing.

use crate::{
    config::ServerConfig,
    connection::{ConnectionManager, Departure, WatchDelta},
    error::ServerError,
    messaging::MessageRelay,
    server::handlers::handle_connection,
    world::{ActorStore, CombatTracker, LocationRegistry, TransferService},
};
use std::sync::Arc;
use thornmoor_event_system::{
    create_event_bus, ActorId, EventBus, EventKind, ShutdownState, WorldEvent,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// The core server structure.
///
/// # Architecture
///
/// * **Event bus**: in-process pub/sub between the movement core and the
///   delivery layer
/// * **Connection manager**: session lifecycle, actor bindings, fan-out
/// * **Transfer service**: the single authority for occupancy changes
/// * **Message relay**: optional Redis bridge to peer server processes
pub struct WorldServer {
    config: ServerConfig,
    bus: Arc<EventBus>,
    connections: Arc<ConnectionManager>,
    transfer: Arc<TransferService>,
    actors: Arc<dyn ActorStore>,
    relay: Arc<MessageRelay>,
    /// Feeds the delivery pump; the relay listener holds a clone.
    pump_tx: mpsc::UnboundedSender<WorldEvent>,
    pump_rx: Mutex<Option<mpsc::UnboundedReceiver<WorldEvent>>>,
    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl WorldServer {
    /// Creates a new world server with the specified configuration.
    ///
    /// Connects the relay when enabled; a configured-but-unreachable relay
    /// degrades to disabled with a warning, since the in-process fallback
    /// keeps a single-process deployment fully functional.
    pub async fn new(
        config: ServerConfig,
        registry: Arc<LocationRegistry>,
        actors: Arc<dyn ActorStore>,
        combat: Arc<dyn CombatTracker>,
    ) -> Arc<Self> {
        let bus = create_event_bus();
        let connections = Arc::new(ConnectionManager::new());
        let (pump_tx, pump_rx) = mpsc::unbounded_channel();
        let (shutdown_sender, _) = broadcast::channel(1);

        let relay = if config.relay.enabled {
            match MessageRelay::connect(&config.relay, pump_tx.clone()).await {
                Ok(relay) => Arc::new(relay),
                Err(e) => {
                    warn!("📡 Relay unavailable, running in-process only: {}", e);
                    Arc::new(MessageRelay::disabled())
                }
            }
        } else {
            info!("📡 Relay disabled; events stay in-process");
            Arc::new(MessageRelay::disabled())
        };

        let transfer = Arc::new(TransferService::new(
            registry,
            actors.clone(),
            combat,
            bus.clone(),
        ));

        Arc::new(Self {
            config,
            bus,
            connections,
            transfer,
            actors,
            relay,
            pump_tx,
            pump_rx: Mutex::new(Some(pump_rx)),
            shutdown_sender,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn transfer(&self) -> &Arc<TransferService> {
        &self.transfer
    }

    pub fn actors(&self) -> &Arc<dyn ActorStore> {
        &self.actors
    }

    pub fn relay(&self) -> &Arc<MessageRelay> {
        &self.relay
    }

    /// Starts the server and runs until shutdown is requested.
    ///
    /// # Startup sequence
    ///
    /// 1. Bridge the event bus into the publisher task
    /// 2. Start the delivery pump and the idle sweeper
    /// 3. Bind the TCP listener and run the accept loop
    /// 4. Stop accepting when shutdown is initiated
    pub async fn start_with_shutdown_state(
        self: &Arc<Self>,
        shutdown_state: ShutdownState,
    ) -> Result<(), ServerError> {
        info!("🚀 Starting world server on {}", self.config.bind_address);

        self.start_event_pipeline().await;
        self.start_idle_sweeper();

        let listener = tokio::net::TcpListener::bind(self.config.bind_address)
            .await
            .map_err(|e| ServerError::Network(format!("bind failed: {e}")))?;
        info!("✅ Listening on {}", self.config.bind_address);

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let accept_loop = {
            let server = self.clone();
            let shutdown_state = shutdown_state.clone();
            async move {
                loop {
                    if shutdown_state.is_shutdown_initiated() {
                        info!("🛑 Accept loop stopping - shutdown initiated");
                        break;
                    }
                    match listener.accept().await {
                        Ok((stream, addr)) => {
                            if server.connections.session_count().await
                                >= server.config.max_connections
                            {
                                warn!("🚧 Connection limit reached, refusing {}", addr);
                                drop(stream);
                                continue;
                            }
                            let server = server.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, server).await {
                                    error!("Connection error: {:?}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            break;
                        }
                    }
                }
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = shutdown_receiver.recv() => {
                info!("Internal shutdown signal received");
            }
        }

        info!("Server stopped");
        Ok(())
    }

    /// Requests server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_sender.send(());
    }

    /// Wires the event bus into the publisher task and starts the
    /// delivery pump.
    ///
    /// Callable once; later calls find the pump receiver taken and only
    /// re-register bus handlers, so tests that drive delivery manually can
    /// skip it entirely.
    pub async fn start_event_pipeline(self: &Arc<Self>) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WorldEvent>();
        for kind in [
            EventKind::ActorEntered,
            EventKind::ActorLeft,
            EventKind::ActorDied,
            EventKind::PostureChanged,
            EventKind::Narrative,
        ] {
            let out_tx = out_tx.clone();
            self.bus.subscribe(kind, move |event| {
                let _ = out_tx.send(event.clone());
            });
        }

        // Publisher: rebind, then offer to the relay, then fall back.
        {
            let server = self.clone();
            tokio::spawn(async move {
                while let Some(event) = out_rx.recv().await {
                    // The listener applies the resulting Watch control
                    // asynchronously, so a cross-process event at the
                    // destination can slip past until the PSUBSCRIBE lands.
                    // The entry event itself is safe: the mover is excluded,
                    // and any other local watcher means the subscription
                    // already exists.
                    // TODO: acknowledge Watch controls if that window ever
                    // matters in practice.
                    if let WorldEvent::ActorEntered { actor, location, .. } = &event {
                        if server.connections.is_actor_local(*actor).await {
                            let delta = server
                                .connections
                                .set_watched_location(*actor, Some(location.clone()))
                                .await;
                            server.apply_watch_delta(delta);
                        }
                    }
                    if !server.relay.publish(&event).await {
                        let _ = server.pump_tx.send(event);
                    }
                }
                debug!("Publisher task exiting");
            });
        }

        // Delivery pump: everything that reaches it is for local sessions.
        let pump_rx = self.pump_rx.lock().await.take();
        if let Some(mut pump_rx) = pump_rx {
            let server = self.clone();
            tokio::spawn(async move {
                while let Some(event) = pump_rx.recv().await {
                    server.connections.deliver_local(&event).await;
                }
                debug!("Delivery pump exiting");
            });
        }
    }

    /// Periodic sweep closing sessions past the liveness timeout.
    fn start_idle_sweeper(self: &Arc<Self>) {
        if self.config.tick_interval_ms == 0 {
            info!("⏸️ Idle sweeper disabled (tick interval: 0ms)");
            return;
        }
        let server = self.clone();
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(server.config.tick_interval_ms));
            let timeout = Duration::from_secs(server.config.connection_timeout);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_receiver.recv() => break,
                }
                for session_id in server.connections.idle_sessions(timeout).await {
                    info!("⏱️ Session {} idle past timeout, closing", session_id);
                    server
                        .connections
                        .kick_session(session_id, Some("idle timeout".into()))
                        .await;
                    let departure = server
                        .connections
                        .unregister_session(
                            session_id,
                            thornmoor_event_system::DisconnectKind::TimedOut,
                        )
                        .await;
                    server.finalize_departure(departure);
                }
            }
        });
    }

    /// Forwards watcher-count zero crossings to the relay subscriptions.
    pub(crate) fn apply_watch_delta(&self, delta: WatchDelta) {
        if let Some(location) = delta.newly_watched {
            self.relay.watch_location(location);
        }
        if let Some(location) = delta.no_longer_watched {
            self.relay.unwatch_location(location);
        }
    }

    /// Acts on the classification of a session teardown.
    ///
    /// `Immediate` removes the actor from the world now; `Grace` schedules
    /// an expiry timer carrying the generation, which a reconnect
    /// invalidates.
    pub(crate) fn finalize_departure(self: &Arc<Self>, departure: Departure) {
        match departure {
            Departure::None => {}
            Departure::Immediate(actor_id) => {
                let server = self.clone();
                tokio::spawn(async move {
                    server.depart_now(actor_id).await;
                });
            }
            Departure::Grace(actor_id, generation) => {
                let server = self.clone();
                let window = Duration::from_secs(self.config.grace_window);
                tokio::spawn(async move {
                    tokio::time::sleep(window).await;
                    if server.connections.expire_grace(actor_id, generation).await {
                        server.depart_now(actor_id).await;
                    }
                });
            }
        }
    }

    /// Removes a departed actor from the world and drops its watch state.
    pub(crate) async fn depart_now(self: &Arc<Self>, actor_id: ActorId) {
        let delta = self.connections.set_watched_location(actor_id, None).await;
        self.apply_watch_delta(delta);
        self.relay.unwatch_actor(actor_id);
        if let Err(e) = self.transfer.remove(actor_id).await {
            debug!("Departure of {} found no occupancy to remove: {}", actor_id, e);
        }
    }
}

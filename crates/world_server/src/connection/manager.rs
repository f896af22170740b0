//! Connection manager for tracking sessions and delivering events.
//!
//! The `ConnectionManager` tracks every live WebSocket session, the actor
//! each session is bound to, and which location every locally-connected
//! actor is currently watching. It is the local delivery endpoint: world
//! events arriving from the bus or the relay are fanned out here to the
//! event-stream sessions of watching actors.
//!
//! Disconnects are classified by [`DisconnectKind`]. Unintentional ones
//! put the actor into a grace window instead of removing it from the
//! world; the grace generation counter makes a stale expiry timer harmless
//! after a reconnect.

use super::session::{Session, SessionId};
use futures_util::sink::SinkExt;
use futures_util::stream::SplitSink;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thornmoor_event_system::{ActorId, ChannelKind, DisconnectKind, LocationId, WorldEvent};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<tokio::net::TcpStream>, Message>;

/// The two sessions an actor may hold, plus its grace-window state.
#[derive(Debug, Default)]
struct ActorSessions {
    command: Option<SessionId>,
    event_stream: Option<SessionId>,
    /// Bumped on every grace entry and every rebind; an expiry timer only
    /// fires if its captured generation still matches.
    grace_generation: u64,
    in_grace: bool,
}

impl ActorSessions {
    fn slot_mut(&mut self, channel: ChannelKind) -> &mut Option<SessionId> {
        match channel {
            ChannelKind::Command => &mut self.command,
            ChannelKind::EventStream => &mut self.event_stream,
        }
    }

    fn has_sessions(&self) -> bool {
        self.command.is_some() || self.event_stream.is_some()
    }
}

/// What a session teardown means for the bound actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The actor still has another session, or the session was unbound.
    None,
    /// Intentional disconnect: remove the actor from the world now.
    Immediate(ActorId),
    /// Unintentional disconnect: the actor entered the grace window; the
    /// generation must match at expiry for removal to proceed.
    Grace(ActorId, u64),
}

/// Change to the locally-watched location set after a watcher rebind.
///
/// The caller forwards these to the relay so its pattern subscriptions
/// track exactly the locations with at least one local watcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchDelta {
    /// A location that gained its first local watcher.
    pub newly_watched: Option<LocationId>,
    /// A location that lost its last local watcher.
    pub no_longer_watched: Option<LocationId>,
}

/// Central manager for all client sessions.
///
/// # Architecture
///
/// * `RwLock<HashMap>` storage for sessions and actor bindings
/// * Atomic counter for session ID assignment
/// * Broadcast channel for outgoing frames; each connection handler
///   subscribes and filters on its own session ID
/// * WebSocket sink registry used only to push close frames on kick
pub struct ConnectionManager {
    sessions: Arc<RwLock<HashMap<SessionId, Session>>>,
    actors: Arc<RwLock<HashMap<ActorId, ActorSessions>>>,
    /// Actor -> the location its event stream is scoped to, plus the
    /// reverse index used by location broadcasts.
    watched: Arc<RwLock<HashMap<ActorId, LocationId>>>,
    watchers: Arc<RwLock<HashMap<LocationId, HashSet<ActorId>>>>,
    ws_senders: Arc<RwLock<HashMap<SessionId, Arc<tokio::sync::Mutex<WsSink>>>>>,
    next_id: Arc<std::sync::atomic::AtomicUsize>,
    sender: broadcast::Sender<(SessionId, String)>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1000);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            actors: Arc::new(RwLock::new(HashMap::new())),
            watched: Arc::new(RwLock::new(HashMap::new())),
            watchers: Arc::new(RwLock::new(HashMap::new())),
            ws_senders: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(std::sync::atomic::AtomicUsize::new(1)),
            sender,
        }
    }

    /// Accepts a new session and returns its unique ID.
    pub async fn add_session(&self, remote_addr: SocketAddr) -> SessionId {
        let session_id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, Session::new(remote_addr));
        info!("🔗 Session {} from {}", session_id, remote_addr);
        session_id
    }

    /// Registers the WebSocket sink for a session so it can be kicked.
    pub async fn register_ws_sender(
        &self,
        session_id: SessionId,
        ws_sender: Arc<tokio::sync::Mutex<WsSink>>,
    ) {
        self.ws_senders.write().await.insert(session_id, ws_sender);
    }

    pub async fn remove_ws_sender(&self, session_id: SessionId) {
        self.ws_senders.write().await.remove(&session_id);
    }

    /// Binds a session to an actor and channel after the hello frame.
    ///
    /// If the actor already holds a session on the same channel, the old
    /// one is kicked first; the new connection always wins. Returns `true`
    /// when the actor was sitting in its grace window, meaning this bind
    /// is a reconnect and the actor never left the world.
    pub async fn bind_actor(
        &self,
        session_id: SessionId,
        actor_id: ActorId,
        channel: ChannelKind,
    ) -> bool {
        let displaced = {
            let mut actors = self.actors.write().await;
            let entry = actors.entry(actor_id).or_default();
            let resumed = entry.in_grace;
            entry.in_grace = false;
            // Invalidate any pending expiry timer.
            entry.grace_generation = entry.grace_generation.wrapping_add(1);
            let displaced = entry.slot_mut(channel).replace(session_id);
            (displaced, resumed)
        };

        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(&session_id) {
                session.actor_id = Some(actor_id);
                session.channel = Some(channel);
                session.touch();
            }
        }

        let (old_session, resumed) = displaced;
        if let Some(old) = old_session {
            if old != session_id {
                debug!(
                    "🔁 Session {} displaces {} for {} ({:?})",
                    session_id, old, actor_id, channel
                );
                self.kick_session(old, Some("replaced by a newer connection".into()))
                    .await;
            }
        }
        if resumed {
            info!("🔌 {} reconnected within the grace window", actor_id);
        }
        resumed
    }

    /// Tears down a session and classifies what it means for the actor.
    ///
    /// The caller acts on the returned [`Departure`]: `Immediate` removes
    /// the actor from the world right away, `Grace` schedules an expiry
    /// timer carrying the returned generation. A `Requested` disconnect
    /// retires the actor's whole session pair: the sibling channel is
    /// kicked and the departure is `Immediate` even while it is connected.
    pub async fn unregister_session(
        &self,
        session_id: SessionId,
        kind: DisconnectKind,
    ) -> Departure {
        self.remove_ws_sender(session_id).await;
        let removed = self.sessions.write().await.remove(&session_id);
        let Some(session) = removed else {
            return Departure::None;
        };
        info!(
            "❌ Session {} from {} disconnected ({:?})",
            session_id, session.remote_addr, kind
        );

        let (Some(actor_id), Some(channel)) = (session.actor_id, session.channel) else {
            return Departure::None;
        };

        let mut actors = self.actors.write().await;
        let Some(entry) = actors.get_mut(&actor_id) else {
            return Departure::None;
        };
        let slot = entry.slot_mut(channel);
        if *slot != Some(session_id) {
            // Displaced by a newer bind; the actor has moved on.
            return Departure::None;
        }
        *slot = None;

        if !kind.is_unintentional() {
            // The actor is leaving the world, so the other channel has
            // nothing left to serve.
            let sibling = entry.command.take().or_else(|| entry.event_stream.take());
            actors.remove(&actor_id);
            drop(actors);
            if let Some(other) = sibling {
                debug!("👋 Closing sibling session {} for {}", other, actor_id);
                self.kick_session(other, Some("actor left the world".into()))
                    .await;
            }
            return Departure::Immediate(actor_id);
        }

        if entry.has_sessions() {
            return Departure::None;
        }

        entry.in_grace = true;
        entry.grace_generation = entry.grace_generation.wrapping_add(1);
        let generation = entry.grace_generation;
        info!("⏳ {} entered the grace window", actor_id);
        Departure::Grace(actor_id, generation)
    }

    /// Finalizes a grace window if it is still pending.
    ///
    /// Returns `true` only when the actor is still in grace and the
    /// generation matches the one captured at scheduling time; a reconnect
    /// in between bumps the generation and the stale timer is a no-op.
    pub async fn expire_grace(&self, actor_id: ActorId, generation: u64) -> bool {
        let mut actors = self.actors.write().await;
        match actors.get(&actor_id) {
            Some(entry) if entry.in_grace && entry.grace_generation == generation => {
                actors.remove(&actor_id);
                info!("⏳ Grace window expired for {}", actor_id);
                true
            }
            _ => false,
        }
    }

    /// Whether the actor has at least one live session or is in grace.
    pub async fn is_actor_local(&self, actor_id: ActorId) -> bool {
        self.actors.read().await.contains_key(&actor_id)
    }

    pub async fn actor_for_session(&self, session_id: SessionId) -> Option<ActorId> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).and_then(|s| s.actor_id)
    }

    /// Marks activity on a session for the idle sweep.
    pub async fn touch_session(&self, session_id: SessionId) {
        if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
            session.touch();
        }
    }

    /// Sessions that have been silent longer than `timeout`.
    pub async fn idle_sessions(&self, timeout: Duration) -> Vec<SessionId> {
        let now = SystemTime::now();
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, s)| s.idle_for(now) > timeout)
            .map(|(id, _)| *id)
            .collect()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Rebinds which location an actor's event stream is scoped to.
    ///
    /// `location = None` clears the binding (the actor left the world).
    /// The returned delta names the locations whose local-watcher count
    /// crossed zero, which is what the relay subscriptions track.
    pub async fn set_watched_location(
        &self,
        actor_id: ActorId,
        location: Option<LocationId>,
    ) -> WatchDelta {
        let mut watched = self.watched.write().await;
        let mut watchers = self.watchers.write().await;
        let mut delta = WatchDelta::default();

        let previous = match &location {
            Some(l) => watched.insert(actor_id, l.clone()),
            None => watched.remove(&actor_id),
        };
        if previous == location {
            return delta;
        }

        if let Some(old) = previous {
            if let Some(set) = watchers.get_mut(&old) {
                set.remove(&actor_id);
                if set.is_empty() {
                    watchers.remove(&old);
                    delta.no_longer_watched = Some(old);
                }
            }
        }
        if let Some(new) = location {
            let set = watchers.entry(new.clone()).or_default();
            if set.is_empty() {
                delta.newly_watched = Some(new);
            }
            set.insert(actor_id);
        }
        delta
    }

    pub async fn watched_location(&self, actor_id: ActorId) -> Option<LocationId> {
        self.watched.read().await.get(&actor_id).cloned()
    }

    /// Delivers a world event to every local session that should see it.
    ///
    /// Location-scoped events go to the event streams of the watchers of
    /// that location, minus the event's excluded actor (an actor never
    /// hears its own movement echoed back). Actor-scoped events go to just
    /// that actor.
    pub async fn deliver_local(&self, event: &WorldEvent) {
        let payload = match event.to_json() {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize event for delivery: {}", e);
                return;
            }
        };

        match event.location() {
            Some(location) => {
                let targets: Vec<ActorId> = {
                    let watchers = self.watchers.read().await;
                    watchers
                        .get(location)
                        .map(|set| {
                            set.iter()
                                .copied()
                                .filter(|a| Some(*a) != event.excluded_actor())
                                .collect()
                        })
                        .unwrap_or_default()
                };
                for actor_id in targets {
                    self.send_to_actor(actor_id, &payload).await;
                }
            }
            None => {
                self.send_to_actor(event.actor(), &payload).await;
            }
        }
    }

    /// Broadcasts a raw frame to every watcher of a location.
    ///
    /// Used by the command layer for narrative text that does not go
    /// through the event bus. Returns the number of sessions targeted.
    pub async fn broadcast_to_location(
        &self,
        location: &LocationId,
        payload: &str,
        exclude: Option<ActorId>,
    ) -> usize {
        let targets: Vec<ActorId> = {
            let watchers = self.watchers.read().await;
            watchers
                .get(location)
                .map(|set| {
                    set.iter()
                        .copied()
                        .filter(|a| Some(*a) != exclude)
                        .collect()
                })
                .unwrap_or_default()
        };
        let count = targets.len();
        for actor_id in targets {
            self.send_to_actor(actor_id, payload).await;
        }
        debug!("📡 Broadcast to {} watchers of {}", count, location);
        count
    }

    /// Queues a frame for the actor's event-stream session.
    ///
    /// Direct, bypass-bus delivery for layers producing targeted text
    /// (a command result, a whisper). A no-op for actors with no local
    /// event-stream session.
    pub async fn send_to_actor(&self, actor_id: ActorId, payload: &str) {
        let session_id = {
            let actors = self.actors.read().await;
            actors.get(&actor_id).and_then(|e| e.event_stream)
        };
        if let Some(session_id) = session_id {
            self.send_to_session(session_id, payload.to_string());
        }
    }

    /// Queues a frame for a specific session.
    pub fn send_to_session(&self, session_id: SessionId, payload: String) {
        if let Err(e) = self.sender.send((session_id, payload)) {
            tracing::error!("Failed to queue frame for session {}: {:?}", session_id, e);
        }
    }

    /// Closes a session with a WebSocket close frame and removes it.
    pub async fn kick_session(&self, session_id: SessionId, reason: Option<String>) {
        let senders = self.ws_senders.read().await;
        if let Some(ws_sender) = senders.get(&session_id) {
            let mut ws_sender = ws_sender.lock().await;
            use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
            let close_msg =
                Message::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: CloseCode::Normal,
                    reason: reason.unwrap_or_else(|| "Closed by server".into()).into(),
                }));
            let _ = ws_sender.send(close_msg).await;
        }
        drop(senders);
        // The read loop sees the close and runs the normal teardown; this
        // only covers sessions with no live read loop.
        self.remove_ws_sender(session_id).await;
    }

    /// Creates a new receiver for outgoing frames.
    ///
    /// Each connection handler subscribes and forwards only the frames
    /// addressed to its own session ID.
    pub fn subscribe(&self) -> broadcast::Receiver<(SessionId, String)> {
        self.sender.subscribe()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thornmoor_event_system::current_timestamp;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn intentional_disconnect_is_immediate() {
        let manager = ConnectionManager::new();
        let actor = ActorId::new();
        let s1 = manager.add_session(addr()).await;
        manager.bind_actor(s1, actor, ChannelKind::Command).await;

        let departure = manager
            .unregister_session(s1, DisconnectKind::Requested)
            .await;
        assert_eq!(departure, Departure::Immediate(actor));
        assert!(!manager.is_actor_local(actor).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn quit_on_one_channel_retires_the_pair() {
        let manager = ConnectionManager::new();
        let actor = ActorId::new();
        let command = manager.add_session(addr()).await;
        manager.bind_actor(command, actor, ChannelKind::Command).await;
        let stream = manager.add_session(addr()).await;
        manager
            .bind_actor(stream, actor, ChannelKind::EventStream)
            .await;

        let departure = manager
            .unregister_session(command, DisconnectKind::Requested)
            .await;
        assert_eq!(departure, Departure::Immediate(actor));
        assert!(!manager.is_actor_local(actor).await);

        // The kicked event stream tears down without a second departure.
        let leftover = manager
            .unregister_session(stream, DisconnectKind::TransportLost)
            .await;
        assert_eq!(leftover, Departure::None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn displaced_session_teardown_leaves_the_new_bind_alone() {
        let manager = ConnectionManager::new();
        let actor = ActorId::new();
        let old = manager.add_session(addr()).await;
        manager.bind_actor(old, actor, ChannelKind::Command).await;
        let new = manager.add_session(addr()).await;
        manager.bind_actor(new, actor, ChannelKind::Command).await;

        let departure = manager
            .unregister_session(old, DisconnectKind::Requested)
            .await;
        assert_eq!(departure, Departure::None);
        assert!(manager.is_actor_local(actor).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transport_loss_enters_grace_and_reconnect_cancels_it() {
        let manager = ConnectionManager::new();
        let actor = ActorId::new();
        let s1 = manager.add_session(addr()).await;
        manager.bind_actor(s1, actor, ChannelKind::EventStream).await;

        let departure = manager
            .unregister_session(s1, DisconnectKind::TransportLost)
            .await;
        let Departure::Grace(a, generation) = departure else {
            panic!("expected grace, got {departure:?}");
        };
        assert_eq!(a, actor);
        assert!(manager.is_actor_local(actor).await);

        // Reconnect before the timer fires.
        let s2 = manager.add_session(addr()).await;
        let resumed = manager.bind_actor(s2, actor, ChannelKind::EventStream).await;
        assert!(resumed);

        // The stale timer must be a no-op.
        assert!(!manager.expire_grace(actor, generation).await);
        assert!(manager.is_actor_local(actor).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn grace_expiry_fires_only_once() {
        let manager = ConnectionManager::new();
        let actor = ActorId::new();
        let s1 = manager.add_session(addr()).await;
        manager.bind_actor(s1, actor, ChannelKind::Command).await;

        let Departure::Grace(_, generation) = manager
            .unregister_session(s1, DisconnectKind::TimedOut)
            .await
        else {
            panic!("expected grace");
        };
        assert!(manager.expire_grace(actor, generation).await);
        assert!(!manager.expire_grace(actor, generation).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_channel_keeps_actor_out_of_grace() {
        let manager = ConnectionManager::new();
        let actor = ActorId::new();
        let s1 = manager.add_session(addr()).await;
        let s2 = manager.add_session(addr()).await;
        manager.bind_actor(s1, actor, ChannelKind::Command).await;
        manager.bind_actor(s2, actor, ChannelKind::EventStream).await;

        let departure = manager
            .unregister_session(s1, DisconnectKind::TransportLost)
            .await;
        assert_eq!(departure, Departure::None);
        assert!(manager.is_actor_local(actor).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn watch_delta_tracks_zero_crossings() {
        let manager = ConnectionManager::new();
        let a1 = ActorId::new();
        let a2 = ActorId::new();
        let square = LocationId::from("square");
        let gate = LocationId::from("gate");

        let delta = manager.set_watched_location(a1, Some(square.clone())).await;
        assert_eq!(delta.newly_watched, Some(square.clone()));

        // Second watcher on the same location crosses nothing.
        let delta = manager.set_watched_location(a2, Some(square.clone())).await;
        assert_eq!(delta, WatchDelta::default());

        // First watcher moves away; square still has a2.
        let delta = manager.set_watched_location(a1, Some(gate.clone())).await;
        assert_eq!(delta.newly_watched, Some(gate));
        assert_eq!(delta.no_longer_watched, None);

        let delta = manager.set_watched_location(a2, None).await;
        assert_eq!(delta.no_longer_watched, Some(square));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn direct_delivery_bypasses_the_bus() {
        let manager = ConnectionManager::new();
        let speaker = ActorId::new();
        let listener = ActorId::new();
        let square = LocationId::from("square");

        let s_speaker = manager.add_session(addr()).await;
        let s_listener = manager.add_session(addr()).await;
        manager
            .bind_actor(s_speaker, speaker, ChannelKind::EventStream)
            .await;
        manager
            .bind_actor(s_listener, listener, ChannelKind::EventStream)
            .await;
        manager
            .set_watched_location(speaker, Some(square.clone()))
            .await;
        manager
            .set_watched_location(listener, Some(square.clone()))
            .await;

        let mut rx = manager.subscribe();
        let reached = manager
            .broadcast_to_location(&square, "a bell tolls", Some(speaker))
            .await;
        assert_eq!(reached, 1);
        let (target, payload) = rx.recv().await.unwrap();
        assert_eq!(target, s_listener);
        assert_eq!(payload, "a bell tolls");

        manager.send_to_actor(speaker, "you hear nothing").await;
        let (target, _) = rx.recv().await.unwrap();
        assert_eq!(target, s_speaker);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivery_excludes_the_moving_actor() {
        let manager = ConnectionManager::new();
        let mover = ActorId::new();
        let bystander = ActorId::new();
        let square = LocationId::from("square");

        let s_mover = manager.add_session(addr()).await;
        let s_bystander = manager.add_session(addr()).await;
        manager
            .bind_actor(s_mover, mover, ChannelKind::EventStream)
            .await;
        manager
            .bind_actor(s_bystander, bystander, ChannelKind::EventStream)
            .await;
        manager.set_watched_location(mover, Some(square.clone())).await;
        manager
            .set_watched_location(bystander, Some(square.clone()))
            .await;

        let mut rx = manager.subscribe();
        manager
            .deliver_local(&WorldEvent::ActorEntered {
                actor: mover,
                location: square,
                from: None,
                exclude: Some(mover),
                timestamp: current_timestamp(),
            })
            .await;

        let (target, payload) = rx.recv().await.unwrap();
        assert_eq!(target, s_bystander);
        assert!(payload.contains("entered"));
        assert!(rx.try_recv().is_err());
    }
}

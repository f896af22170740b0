//! Redis-backed message relay for inter-process event routing.
//!
//! Events are published to subject channels (`world.<type>.<location-id>`,
//! `actor.<type>.<actor-id>`) and received back through pattern
//! subscriptions covering the locations with at least one local watcher
//! and the locally-connected actors. The relay is an optimization layer:
//! `publish` reports failure to the caller instead of escalating, and the
//! caller falls back to direct in-process delivery. A single-process
//! deployment runs with the relay disabled and behaves identically.
//!
//! Delivery to local sessions always happens on the inbound path when a
//! publish succeeds (Redis delivers to the publishing process like any
//! other subscriber), so each event reaches local sessions exactly once
//! with no origin tagging.

use crate::config::RelayConfig;
use crate::error::ServerError;
use futures_util::StreamExt;
use std::time::Duration;
use thornmoor_event_system::{
    actor_subject_pattern, location_subject_pattern, ActorId, LocationId, WorldEvent,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Subscription changes sent to the listener task.
///
/// Watch/unwatch follow the local watcher index crossing zero for a
/// location, and actor subjects follow session bind/teardown.
#[derive(Debug, Clone)]
pub enum RelayControl {
    Watch(LocationId),
    Unwatch(LocationId),
    WatchActor(ActorId),
    UnwatchActor(ActorId),
}

/// Handle to the relay: a publisher connection plus the control channel
/// of the listener task.
pub struct MessageRelay {
    publisher: Option<redis::aio::ConnectionManager>,
    control: mpsc::UnboundedSender<RelayControl>,
    publish_timeout: Duration,
}

impl std::fmt::Debug for MessageRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageRelay")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl MessageRelay {
    /// Connects to Redis and spawns the listener task.
    ///
    /// Events received on subscribed subjects are decoded and forwarded
    /// over `inbound`; they are never re-published.
    pub async fn connect(
        config: &RelayConfig,
        inbound: mpsc::UnboundedSender<WorldEvent>,
    ) -> Result<Self, ServerError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| ServerError::Relay(format!("invalid relay URL: {e}")))?;
        let publisher = client
            .get_connection_manager()
            .await
            .map_err(|e| ServerError::Relay(format!("relay connect failed: {e}")))?;
        let pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| ServerError::Relay(format!("relay pub/sub connect failed: {e}")))?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_listener(pubsub, control_rx, inbound));
        info!("📡 Message relay connected to {}", config.url);

        Ok(Self {
            publisher: Some(publisher),
            control: control_tx,
            publish_timeout: Duration::from_millis(config.publish_timeout_ms),
        })
    }

    /// A relay that is permanently off; every publish reports fallback.
    pub fn disabled() -> Self {
        let (control_tx, _) = mpsc::unbounded_channel();
        Self {
            publisher: None,
            control: control_tx,
            publish_timeout: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.publisher.is_some()
    }

    /// Publishes an event to its subject channel.
    ///
    /// Returns `true` when the relay accepted the event; local delivery
    /// then happens on the inbound path. Returns `false` when the relay is
    /// disabled, timed out, or errored, and the caller must deliver
    /// locally itself.
    pub async fn publish(&self, event: &WorldEvent) -> bool {
        let Some(publisher) = &self.publisher else {
            return false;
        };
        let payload = match event.to_json() {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to serialize event for relay: {}", e);
                return false;
            }
        };
        let subject = event.subject();

        let mut conn = publisher.clone();
        let publish = async move {
            redis::cmd("PUBLISH")
                .arg(&subject)
                .arg(&payload)
                .query_async::<()>(&mut conn)
                .await
        };
        match tokio::time::timeout(self.publish_timeout, publish).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("📡 Relay publish failed, falling back to local delivery: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    "📡 Relay publish timed out after {:?}, falling back to local delivery",
                    self.publish_timeout
                );
                false
            }
        }
    }

    pub fn watch_location(&self, location: LocationId) {
        let _ = self.control.send(RelayControl::Watch(location));
    }

    pub fn unwatch_location(&self, location: LocationId) {
        let _ = self.control.send(RelayControl::Unwatch(location));
    }

    pub fn watch_actor(&self, actor: ActorId) {
        let _ = self.control.send(RelayControl::WatchActor(actor));
    }

    pub fn unwatch_actor(&self, actor: ActorId) {
        let _ = self.control.send(RelayControl::UnwatchActor(actor));
    }
}

/// The listener task: owns the pub/sub connection, applies control
/// messages as pattern (un)subscriptions, and forwards decoded events.
async fn run_listener(
    mut pubsub: redis::aio::PubSub,
    mut control: mpsc::UnboundedReceiver<RelayControl>,
    inbound: mpsc::UnboundedSender<WorldEvent>,
) {
    enum Wake {
        Control(Option<RelayControl>),
        Message(Option<redis::Msg>),
    }

    loop {
        // The message stream borrows the connection; scope it so control
        // messages can use the connection afterwards.
        let wake = {
            let mut stream = pubsub.on_message();
            tokio::select! {
                ctl = control.recv() => Wake::Control(ctl),
                msg = stream.next() => Wake::Message(msg),
            }
        };

        match wake {
            Wake::Control(None) => {
                debug!("📡 Relay control channel closed; listener exiting");
                break;
            }
            Wake::Control(Some(ctl)) => {
                let result = match &ctl {
                    RelayControl::Watch(location) => {
                        pubsub.psubscribe(location_subject_pattern(location)).await
                    }
                    RelayControl::Unwatch(location) => {
                        pubsub.punsubscribe(location_subject_pattern(location)).await
                    }
                    RelayControl::WatchActor(actor) => {
                        pubsub.psubscribe(actor_subject_pattern(*actor)).await
                    }
                    RelayControl::UnwatchActor(actor) => {
                        pubsub.punsubscribe(actor_subject_pattern(*actor)).await
                    }
                };
                match result {
                    Ok(()) => debug!("📡 Relay subscription change applied: {:?}", ctl),
                    Err(e) => warn!("📡 Relay subscription change {:?} failed: {}", ctl, e),
                }
            }
            Wake::Message(Some(msg)) => {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("📡 Unreadable relay payload on {}: {}", msg.get_channel_name(), e);
                        continue;
                    }
                };
                match WorldEvent::from_json(&payload) {
                    Ok(event) => {
                        if inbound.send(event).is_err() {
                            debug!("📡 Relay inbound channel closed; listener exiting");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "📡 Undecodable relay message on {}: {}",
                            msg.get_channel_name(),
                            e
                        );
                    }
                }
            }
            Wake::Message(None) => {
                warn!("📡 Relay pub/sub stream ended");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thornmoor_event_system::current_timestamp;

    #[tokio::test(flavor = "multi_thread")]
    async fn disabled_relay_always_requests_fallback() {
        let relay = MessageRelay::disabled();
        assert!(!relay.is_enabled());

        let event = WorldEvent::Narrative {
            actor: ActorId::new(),
            text: "the wind picks up".to_string(),
            timestamp: current_timestamp(),
        };
        assert!(!relay.publish(&event).await);

        // Control messages on a disabled relay are silently dropped.
        relay.watch_location(LocationId::from("square"));
        relay.unwatch_actor(ActorId::new());
    }
}

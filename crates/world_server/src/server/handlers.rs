//! Connection handling logic for WebSocket clients.
//!
//! Manages the lifecycle of one client connection: WebSocket handshake,
//! hello frame, actor binding and placement, the incoming/outgoing frame
//! tasks, and disconnect classification on exit.

use crate::{
    connection::SessionId,
    error::ServerError,
    messaging::{route_client_command, ClientHello, CommandDisposition},
    server::core::WorldServer,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use thornmoor_event_system::{ActorId, ChannelKind, DisconnectKind, LocationId};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, trace, warn};

/// How long a fresh socket gets to present its hello frame.
const HELLO_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Handles a single client connection from handshake to cleanup.
///
/// # Connection flow
///
/// 1. Perform the WebSocket handshake and register the session
/// 2. Await the hello frame; resolve or mint the actor
/// 3. Bind the session to the actor and channel, place the actor into the
///    world if it is not already present
/// 4. Run the incoming and outgoing frame tasks until one ends
/// 5. Classify the disconnect and act on the resulting departure
///
/// # Returns
///
/// `Ok(())` if the connection was handled to completion, or a
/// `ServerError` for handshake failures.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server: Arc<WorldServer>,
) -> Result<(), ServerError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (ws_sender, mut ws_receiver) = ws_stream.split();
    let ws_sender = Arc::new(tokio::sync::Mutex::new(ws_sender));
    let session_id = server.connections().add_session(addr).await;
    server
        .connections()
        .register_ws_sender(session_id, ws_sender.clone())
        .await;

    // The hello frame binds the socket to an actor and channel; anything
    // else within the window is a protocol error.
    let hello = match await_hello(&mut ws_receiver).await {
        Ok(hello) => hello,
        Err(reason) => {
            warn!("🚪 Session {} rejected: {}", session_id, reason);
            server
                .connections()
                .kick_session(session_id, Some(reason))
                .await;
            server
                .connections()
                .unregister_session(session_id, DisconnectKind::Requested)
                .await;
            return Ok(());
        }
    };

    let (actor_id, location) = match establish_actor(&server, session_id, &hello).await {
        Ok(bound) => bound,
        Err(reason) => {
            warn!("🚪 Session {} rejected: {}", session_id, reason);
            server
                .connections()
                .kick_session(session_id, Some(reason))
                .await;
            server
                .connections()
                .unregister_session(session_id, DisconnectKind::Requested)
                .await;
            return Ok(());
        }
    };

    let ack = serde_json::json!({
        "ok": true,
        "actor_id": actor_id,
        "location": location,
        "channel": hello.channel,
    });
    server
        .connections()
        .send_to_session(session_id, ack.to_string());
    info!(
        "👋 {} bound session {} ({:?}) from {}",
        actor_id, session_id, hello.channel, addr
    );

    let mut frame_receiver = server.connections().subscribe();
    let ws_sender_incoming = ws_sender.clone();

    // Incoming frame task; resolves to the disconnect classification.
    let incoming_task = {
        let server = server.clone();
        let channel = hello.channel;
        async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        server.connections().touch_session(session_id).await;
                        match channel {
                            ChannelKind::Command => {
                                match route_client_command(
                                    &text,
                                    session_id,
                                    server.connections(),
                                    server.transfer(),
                                )
                                .await
                                {
                                    Ok(CommandDisposition::Continue) => {}
                                    Ok(CommandDisposition::Quit) => {
                                        return DisconnectKind::Requested;
                                    }
                                    Err(e) => {
                                        trace!("❌ Command routing error: {}", e);
                                    }
                                }
                            }
                            // The event stream is one-way; inbound text on
                            // it only refreshes liveness.
                            ChannelKind::EventStream => {}
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("🔌 Client on session {} requested close", session_id);
                        return DisconnectKind::Requested;
                    }
                    Ok(Message::Ping(data)) => {
                        server.connections().touch_session(session_id).await;
                        let mut ws_sender = ws_sender_incoming.lock().await;
                        let _ = ws_sender.send(Message::Pong(data)).await;
                    }
                    Err(e) => {
                        error!("WebSocket error on session {}: {}", session_id, e);
                        return DisconnectKind::TransportLost;
                    }
                    _ => {}
                }
            }
            DisconnectKind::TransportLost
        }
    };

    // Outgoing frame task: drains the broadcast channel for this session.
    let outgoing_task = pump_outgoing(session_id, frame_receiver, ws_sender.clone());

    let kind = tokio::select! {
        kind = incoming_task => kind,
        _ = outgoing_task => DisconnectKind::TransportLost,
    };

    if kind == DisconnectKind::Requested {
        let mut ws_sender = ws_sender.lock().await;
        let _ = ws_sender.send(Message::Close(None)).await;
    }

    let departure = server
        .connections()
        .unregister_session(session_id, kind)
        .await;
    server.finalize_departure(departure);
    Ok(())
}

/// Forwards broadcast frames addressed to one session into its sink.
///
/// A lagged receiver loses only the overwritten frames; the session stays
/// up. The pump ends when the sink errors or the channel closes.
async fn pump_outgoing<S>(
    session_id: SessionId,
    mut frame_receiver: broadcast::Receiver<(SessionId, String)>,
    ws_sender: Arc<tokio::sync::Mutex<S>>,
) where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        match frame_receiver.recv().await {
            Ok((target_session_id, frame)) => {
                if target_session_id == session_id {
                    let mut ws_sender = ws_sender.lock().await;
                    if let Err(e) = ws_sender.send(Message::Text(frame.into())).await {
                        error!("Failed to send frame on session {}: {}", session_id, e);
                        break;
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(
                    "Session {} fell behind the frame stream, skipped {}",
                    session_id, skipped
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Waits for the hello frame, skipping control frames.
async fn await_hello(
    ws_receiver: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> Result<ClientHello, String> {
    let deadline = tokio::time::sleep(HELLO_TIMEOUT);
    tokio::pin!(deadline);
    loop {
        let msg = tokio::select! {
            msg = ws_receiver.next() => msg,
            _ = &mut deadline => return Err("hello timed out".to_string()),
        };
        match msg {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str::<ClientHello>(&text)
                    .map_err(|e| format!("malformed hello: {e}"));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err("closed before hello".to_string());
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(format!("transport error before hello: {e}")),
        }
    }
}

/// Resolves the hello frame to an actor, binds the session, and makes
/// sure the actor is present in the world.
///
/// A reconnect within the grace window rebinds to the retained watch
/// state and emits no new `ActorEntered`.
async fn establish_actor(
    server: &Arc<WorldServer>,
    session_id: SessionId,
    hello: &ClientHello,
) -> Result<(ActorId, LocationId), String> {
    let record = match hello.actor_id {
        Some(actor_id) => server
            .actors()
            .get_actor(actor_id)
            .await
            .ok_or_else(|| format!("unknown actor {actor_id}"))?,
        None => {
            let start = server.config().start_location.clone();
            server
                .actors()
                .create_actor(&hello.name, &start)
                .await
                .map_err(|e| format!("could not create actor: {e}"))?
        }
    };

    let resumed = server
        .connections()
        .bind_actor(session_id, record.id, hello.channel)
        .await;
    server.relay().watch_actor(record.id);

    let registry = server.transfer().registry();
    let location = match registry.locate_actor(record.id) {
        Some(location) => location,
        None => {
            let location = if registry.contains(&record.location) {
                record.location.clone()
            } else {
                server.config().start_location.clone()
            };
            server
                .transfer()
                .place(record.id, &location)
                .await
                .map_err(|e| format!("could not place actor: {e}"))?;
            location
        }
    };

    // The publisher rebinds on ActorEntered, but a resumed session emits
    // none; bind the watch here either way, it is idempotent.
    if !resumed || server.connections().watched_location(record.id).await.is_none() {
        let delta = server
            .connections()
            .set_watched_location(record.id, Some(location.clone()))
            .await;
        server.apply_watch_delta(delta);
    }

    Ok((record.id, location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::time::Duration;

    struct CollectSink(Vec<Message>);

    impl futures::Sink<Message> for CollectSink {
        type Error = std::convert::Infallible;

        fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn start_send(self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
            self.get_mut().0.push(item);
            Ok(())
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn lagged_frame_stream_keeps_the_session_alive() {
        let (tx, rx) = broadcast::channel(4);
        let sink = Arc::new(tokio::sync::Mutex::new(CollectSink(Vec::new())));

        // Overflow the channel before the pump gets to drain it.
        for i in 0..16 {
            let _ = tx.send((7usize, format!("frame {i}")));
        }
        let pump = tokio::spawn(pump_outgoing(7, rx, sink.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send((7, "after the lag".to_string()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(tx);
        pump.await.expect("pump task");

        let frames = sink.lock().await;
        assert!(frames
            .0
            .iter()
            .any(|m| matches!(m, Message::Text(t) if t.as_str() == "after the lag")));
    }
}

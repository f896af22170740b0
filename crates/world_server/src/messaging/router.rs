//! Command routing for frames arriving on the command channel.
//!
//! Parses incoming text as a [`ClientCommand`], resolves the actor bound
//! to the session, dispatches the verb to the world core, and queues the
//! [`CommandResponse`] back onto the same session. A malformed or unknown
//! command always produces a failure response, never a dropped connection.

use crate::connection::{ConnectionManager, SessionId};
use crate::error::ServerError;
use crate::messaging::{ClientCommand, CommandResponse, MoveDelta};
use crate::world::TransferService;
use std::str::FromStr;
use thornmoor_event_system::Direction;
use tracing::debug;

/// What the connection handler should do after a routed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandDisposition {
    /// Keep reading frames.
    Continue,
    /// The client asked to leave; close the session as intentional.
    Quit,
}

/// Routes one command frame from a client session.
///
/// # Arguments
///
/// * `text` - The raw frame text (expected to be JSON)
/// * `session_id` - The session the frame arrived on
/// * `connections` - Used to resolve the bound actor and queue the reply
/// * `transfer` - The world core that executes movement
///
/// # Returns
///
/// The disposition for the connection handler. Errors are reserved for
/// sessions in an unusable state (no actor bound); ordinary command
/// failures are reported to the client and return `Continue`.
pub async fn route_client_command(
    text: &str,
    session_id: SessionId,
    connections: &ConnectionManager,
    transfer: &TransferService,
) -> Result<CommandDisposition, ServerError> {
    let actor_id = connections
        .actor_for_session(session_id)
        .await
        .ok_or_else(|| ServerError::Internal("session has no bound actor".to_string()))?;

    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(c) => c,
        Err(e) => {
            let response = CommandResponse::fail(format!("malformed command: {e}"));
            respond(connections, session_id, &response);
            return Ok(CommandDisposition::Continue);
        }
    };

    debug!("📨 '{}' from {} (session {})", command.command, actor_id, session_id);

    match command.command.as_str() {
        "move" => {
            let direction = command
                .params
                .get("direction")
                .and_then(|v| v.as_str())
                .and_then(|s| Direction::from_str(s).ok());
            let response = match direction {
                None => CommandResponse::fail("which way?"),
                Some(direction) => match transfer.move_by_exit(actor_id, direction).await {
                    Ok(outcome) => {
                        let name = transfer
                            .registry()
                            .name(&outcome.to)
                            .unwrap_or_else(|| outcome.to.to_string());
                        CommandResponse::ok_with_delta(
                            format!("you head {direction} to {name}"),
                            MoveDelta {
                                from: outcome.from,
                                to: outcome.to,
                                direction: direction.to_string(),
                            },
                        )
                    }
                    Err(reason) => CommandResponse::fail(reason.to_string()),
                },
            };
            respond(connections, session_id, &response);
            Ok(CommandDisposition::Continue)
        }
        "quit" => {
            respond(connections, session_id, &CommandResponse::ok("farewell"));
            Ok(CommandDisposition::Quit)
        }
        other => {
            respond(
                connections,
                session_id,
                &CommandResponse::fail(format!("unknown command '{other}'")),
            );
            Ok(CommandDisposition::Continue)
        }
    }
}

fn respond(connections: &ConnectionManager, session_id: SessionId, response: &CommandResponse) {
    match serde_json::to_string(response) {
        Ok(payload) => connections.send_to_session(session_id, payload),
        Err(e) => tracing::error!("Failed to serialize response: {}", e),
    }
}

//! Control protocol server: agent registration and the response pump.
//!
//! Per connection:
//! 1. Read one JSON handshake `{"type":"register","endpoint":…,"authToken":…}`
//! 2. Check the shared secret when one is configured
//! 3. Register an [`AgentTunnel`] under the endpoint and ack `{"ok":true}`
//! 4. Feed every inbound data frame to the tunnel's pending slot
//! 5. On EOF, error, or termination: release the waiter, release the
//!    endpoint if still ours, close the socket

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::agent::AgentTunnel;
use super::Tunnel;
use crate::state::RelayState;

/// `type` value of the registration handshake.
pub const REGISTER: &str = "register";

/// Outbound frames buffered per agent before `forward` waits on the writer.
const OUTBOUND_CAPACITY: usize = 64;

/// Handshake message sent by the agent as its first frame.
#[derive(Debug, Deserialize)]
struct ControlMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default, rename = "authToken")]
    auth_token: Option<String>,
}

/// Why a handshake was rejected. `Display` is the text sent to the agent.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum HandshakeError {
    #[error("invalid register")]
    Malformed,
    #[error("invalid register")]
    MissingEndpoint,
    #[error("unauthorized: invalid or missing auth token")]
    Unauthorized,
}

/// Validate a handshake frame and return the endpoint it registers.
pub fn parse_handshake(data: &[u8], secret: Option<&str>) -> Result<String, HandshakeError> {
    let msg: ControlMessage =
        serde_json::from_slice(data).map_err(|_| HandshakeError::Malformed)?;
    if msg.kind != REGISTER {
        return Err(HandshakeError::Malformed);
    }
    if msg.endpoint.is_empty() {
        return Err(HandshakeError::MissingEndpoint);
    }
    if !crate::auth::token_matches(secret, msg.auth_token.as_deref()) {
        return Err(HandshakeError::Unauthorized);
    }
    Ok(msg.endpoint)
}

/// Complete the WebSocket upgrade and run the agent connection.
pub fn accept(state: RelayState, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| {
        handle_agent_ws(socket, state).instrument(agent_span(uuid::Uuid::new_v4()))
    })
}

/// Span for one agent connection. `endpoint` is recorded once registered.
fn agent_span(conn_id: uuid::Uuid) -> Span {
    info_span!("agent", endpoint = tracing::field::Empty, %conn_id)
}

/// Read the first data frame, skipping pings. `None` means the agent left.
async fn first_frame(socket: &mut WebSocket) -> Option<Bytes> {
    loop {
        match socket.recv().await? {
            Ok(Message::Text(text)) => {
                return Some(Bytes::copy_from_slice(text.as_str().as_bytes()));
            }
            Ok(Message::Binary(data)) => return Some(data),
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => return None,
            Err(e) => {
                warn!(error = %e, "Read error before registration");
                return None;
            }
        }
    }
}

async fn handle_agent_ws(mut socket: WebSocket, state: RelayState) {
    let Some(handshake) = first_frame(&mut socket).await else {
        warn!("Agent disconnected before registration");
        return;
    };

    let endpoint = match parse_handshake(&handshake, state.config.auth_token()) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(reason = ?e, "Rejected agent handshake");
            let body = json!({"error": e.to_string()}).to_string();
            let _ = socket.send(Message::Text(body.into())).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let tunnel = Arc::new(AgentTunnel::new(endpoint, outbound_tx));
    let endpoint = tunnel.endpoint();
    Span::current().record("endpoint", endpoint);

    // Subscribe before registering so a replacement racing with us is seen.
    let mut shutdown_rx = tunnel.shutdown_signal();
    let mut writer_shutdown = tunnel.shutdown_signal();

    let id = state.registry.register(endpoint, tunnel.clone(), None);
    info!(endpoint = %endpoint, id, "Agent registered");

    let ack = json!({"ok": true}).to_string();
    if let Err(e) = ws_sink.send(Message::Text(ack.into())).await {
        warn!(endpoint = %endpoint, error = %e, "Failed to send registration ack");
        tunnel.terminate();
    }

    // Writer: drain request frames onto the socket until terminated.
    let writer_tunnel = tunnel.clone();
    let writer = tokio::spawn(
        async move {
            loop {
                tokio::select! {
                    msg = outbound_rx.recv() => {
                        let Some(msg) = msg else { break };
                        if let Err(e) = ws_sink.send(msg).await {
                            warn!(error = %e, "Failed to write frame to agent");
                            writer_tunnel.terminate();
                            break;
                        }
                    }
                    _ = writer_shutdown.changed() => break,
                }
            }
            let _ = ws_sink.send(Message::Close(None)).await;
            let _ = ws_sink.close().await;
        }
        .in_current_span(),
    );

    // Read loop: every data frame answers the outstanding forward.
    loop {
        let msg = tokio::select! {
            msg = ws_stream.next() => match msg {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    warn!(endpoint = %endpoint, error = %e, "Agent read error");
                    break;
                }
                None => break,
            },
            _ = shutdown_rx.changed() => {
                info!(endpoint = %endpoint, "Tunnel terminated, closing agent connection");
                break;
            }
        };

        let frame = match msg {
            Message::Binary(data) => data,
            Message::Text(text) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => break,
        };
        if !tunnel.deliver(frame) {
            debug!(endpoint = %endpoint, "Dropped frame with no request waiting");
        }
    }

    // Closing: unblock the waiter, drop our route, stop the writer.
    tunnel.release_waiter();
    if state.registry.release(endpoint, id) {
        info!(endpoint = %endpoint, "Agent disconnected");
    } else {
        info!(endpoint = %endpoint, "Superseded agent connection closed");
    }
    tunnel.terminate();
    let _ = writer.await;
}

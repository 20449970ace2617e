//! Reverse tunnels from agents to the relay.
//!
//! - [`Tunnel`] is the capability the registry and dispatcher route through:
//!   forward one buffered HTTP request, get one buffered response back.
//! - [`agent::AgentTunnel`] implements it over a single agent WebSocket.
//! - [`relay`] accepts agent connections, runs the registration handshake,
//!   and pumps response frames into the tunnel's pending slot.
//! - [`wire`] encodes requests and decodes responses as raw HTTP/1.1 frames.

pub mod agent;
pub mod relay;
pub mod slot;
pub mod wire;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{Request, Response};

/// Failure while forwarding a request through a tunnel.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The connection went away before a response arrived.
    #[error("tunnel connection closed")]
    Closed,
    /// The request frame could not be handed to the connection writer.
    #[error("failed to send request frame to agent")]
    Send,
    /// The agent answered with something that is not an HTTP/1.x response.
    #[error("malformed response from agent: {0}")]
    MalformedResponse(String),
}

/// A live route to an agent.
///
/// At most one `forward` is in flight per tunnel; implementations serialize
/// concurrent callers. `terminate` must not touch the registry.
#[async_trait]
pub trait Tunnel: Send + Sync {
    /// Forward a fully buffered request and wait for the agent's response.
    async fn forward(&self, request: Request<Bytes>) -> Result<Response<Bytes>, TunnelError>;

    /// Release any waiter and close the underlying connection. Idempotent.
    fn terminate(&self);
}

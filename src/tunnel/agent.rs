//! [`Tunnel`] implementation over one agent WebSocket.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::Message;
use axum::http::{Request, Response};
use tokio::sync::{mpsc, watch, Mutex};

use super::slot::PendingSlot;
use super::{wire, Tunnel, TunnelError};

/// One agent connection bound to one endpoint.
///
/// Request frames go out through `outbound` (drained by the connection's
/// writer task). The read loop hands each inbound frame to [`deliver`].
/// `in_flight` spans install-slot → write → await-response so a second caller
/// can never observe the first caller's response.
///
/// [`deliver`]: AgentTunnel::deliver
pub struct AgentTunnel {
    endpoint: String,
    outbound: mpsc::Sender<Message>,
    slot: PendingSlot,
    in_flight: Mutex<()>,
    shutdown: watch::Sender<bool>,
}

impl AgentTunnel {
    pub fn new(endpoint: impl Into<String>, outbound: mpsc::Sender<Message>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            endpoint: endpoint.into(),
            outbound,
            slot: PendingSlot::new(),
            in_flight: Mutex::new(()),
            shutdown,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Hand an inbound data frame to the waiting forward, if any.
    pub fn deliver(&self, frame: Bytes) -> bool {
        self.slot.deliver(frame)
    }

    /// Release any waiting forward. Called by the read loop on disconnect.
    pub fn release_waiter(&self) {
        self.slot.close();
    }

    /// Watch that flips to `true` once [`Tunnel::terminate`] has been called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

#[async_trait]
impl Tunnel for AgentTunnel {
    async fn forward(&self, request: Request<Bytes>) -> Result<Response<Bytes>, TunnelError> {
        let _in_flight = self.in_flight.lock().await;

        let method = request.method().clone();
        let frame = wire::encode_request(&request);
        let response = self.slot.install()?;

        if self
            .outbound
            .send(Message::Binary(frame.into()))
            .await
            .is_err()
        {
            return Err(TunnelError::Send);
        }

        let data = response.await.map_err(|_| TunnelError::Closed)?;
        wire::decode_response(&method, &data)
    }

    fn terminate(&self) {
        self.slot.close();
        self.shutdown.send_replace(true);
    }
}

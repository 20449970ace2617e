//! Single-outstanding-request correlation for one tunnel.
//!
//! The wire protocol has no request id: the next frame the agent sends is the
//! response to the request currently waiting. A [`PendingSlot`] holds that one
//! waiter. Install, delivery, and close all go through one mutex so a close
//! can never slip between a waiter being installed and it being signaled.

use std::sync::{Mutex, PoisonError};

use axum::body::Bytes;
use tokio::sync::oneshot;

use super::TunnelError;

enum SlotState {
    /// No request is waiting. Frames arriving now are unsolicited.
    Idle,
    /// A forward is waiting for the next frame.
    Waiting(oneshot::Sender<Bytes>),
    /// The connection is gone. Terminal.
    Closed,
}

/// Handoff point between a forwarding task and the connection's read loop.
pub struct PendingSlot {
    state: Mutex<SlotState>,
}

impl Default for PendingSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Idle),
        }
    }

    /// Install a waiter for the next frame.
    ///
    /// Fails with [`TunnelError::Closed`] once the slot has been closed, so a
    /// forward that starts after teardown never waits.
    pub fn install(&self) -> Result<oneshot::Receiver<Bytes>, TunnelError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, SlotState::Closed) {
            return Err(TunnelError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        // A stale waiter, if any, is dropped here and observes Closed.
        *state = SlotState::Waiting(tx);
        Ok(rx)
    }

    /// Hand a frame to the current waiter without blocking.
    ///
    /// Returns `false` if nobody was waiting; the frame is dropped.
    pub fn deliver(&self, frame: Bytes) -> bool {
        let waiter = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, SlotState::Idle) {
                SlotState::Waiting(tx) => tx,
                other => {
                    *state = other;
                    return false;
                }
            }
        };
        waiter.send(frame).is_ok()
    }

    /// Close the slot, signaling "no response" to any waiter exactly once.
    ///
    /// Returns `true` for the call that performed the transition.
    pub fn close(&self) -> bool {
        let previous = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, SlotState::Closed)
        };
        // Dropping a Waiting sender wakes the receiver with RecvError.
        !matches!(previous, SlotState::Closed)
    }
}

//! Registered endpoint listing.

use serde_json::{json, Value};

use crate::state::RelayState;

/// `GET /api/tunnels`: names of every registered endpoint, sorted.
pub fn tunnels(state: &RelayState) -> Value {
    let mut names = state.registry.list();
    names.sort();
    json!({ "tunnels": names })
}

//! Unauthenticated health-check endpoint.

use chrono::SecondsFormat;
use serde_json::{json, Value};

use crate::state::RelayState;

const DEFAULT_PORT: u16 = 8080;

/// `GET /api/health`: liveness probe.
///
/// Returns status, deploy metadata, uptime, start time and the number of
/// registered tunnels. Suitable for load-balancer health checks.
pub fn health(state: &RelayState) -> Value {
    let deploy = &state.config.deploy;
    let port = state.config.listen_port().unwrap_or(DEFAULT_PORT);

    json!({
        "status": "ok",
        "version": deploy.version,
        "image": deploy.image,
        "region": deploy.region,
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "started": state.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        "tunnels": state.registry.len(),
        // One listener serves all three surfaces.
        "ports": {"http": port, "tunnel": port, "api": port},
    })
}

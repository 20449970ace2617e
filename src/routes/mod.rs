//! Status API handlers.
//!
//! Read-only views of the registry for monitoring. No authentication; every
//! response is JSON and carries `Access-Control-Allow-Origin: *`.
//!
//! | Path           | Description                      |
//! |----------------|----------------------------------|
//! | `/api/health`  | Liveness, uptime, deploy info    |
//! | `/api/tunnels` | Registered endpoint names        |

pub mod health;
pub mod tunnels;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use crate::state::RelayState;

/// Serve a status API path. Trailing slashes are accepted.
pub fn serve(state: &RelayState, path: &str) -> Response {
    let (status, body) = match path.strip_suffix('/').unwrap_or(path) {
        "/api/health" => (StatusCode::OK, health::health(state)),
        "/api/tunnels" => (StatusCode::OK, tunnels::tunnels(state)),
        _ => (StatusCode::NOT_FOUND, json!({"error": "not found"})),
    };
    with_cors(status, body)
}

fn with_cors(status: StatusCode, body: Value) -> Response {
    let mut resp = (status, Json(body)).into_response();
    resp.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    resp
}

//! Top-level request routing.
//!
//! One listener serves three surfaces, chosen per request:
//!
//! | Condition                                   | Surface               |
//! |---------------------------------------------|-----------------------|
//! | path starts with `/api/`                    | status API            |
//! | host is `connect_host`                      | agent control upgrade |
//! | host is `api_host`                          | status API            |
//! | other host, path `/tunnel`                  | agent control upgrade |
//! | anything else                               | dispatcher            |

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, HeaderMap, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::state::RelayState;
use crate::{proxy, routes, tunnel};

/// Path prefix always served by the status API.
pub const STATUS_PREFIX: &str = "/api/";

/// Control-protocol upgrade path on non-dedicated hosts.
pub const CONTROL_PATH: &str = "/tunnel";

/// Which surface handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Status,
    Control,
    Proxy,
}

/// Strip a trailing `:port` from a host, leaving IPv6 literals intact.
pub fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        return host.find(']').map_or(host, |end| &host[..=end]);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Lowercased request host without port.
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host())
        .unwrap_or("");
    host_without_port(host).to_ascii_lowercase()
}

/// Pick the surface for a request.
pub fn classify(host: &str, path: &str, server: &ServerConfig) -> Surface {
    if path.starts_with(STATUS_PREFIX) {
        return Surface::Status;
    }
    if host.eq_ignore_ascii_case(&server.connect_host) {
        return Surface::Control;
    }
    if host.eq_ignore_ascii_case(&server.api_host) {
        return Surface::Status;
    }
    if path == CONTROL_PATH {
        return Surface::Control;
    }
    Surface::Proxy
}

async fn route(State(state): State<RelayState>, request: Request) -> Response {
    let host = request_host(request.headers(), request.uri());
    match classify(&host, request.uri().path(), &state.config.server) {
        Surface::Status => routes::serve(&state, request.uri().path()),
        Surface::Control => {
            let (mut parts, _body) = request.into_parts();
            match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
                Ok(ws) => tunnel::relay::accept(state, ws),
                Err(rejection) => rejection.into_response(),
            }
        }
        Surface::Proxy => proxy::dispatch(state, request).await,
    }
}

/// Build the relay router: every request goes through [`classify`].
pub fn router(state: RelayState) -> Router {
    Router::new()
        .fallback(route)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

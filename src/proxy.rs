//! Inbound dispatcher. Forwards external HTTP requests to the owning agent.
//!
//! Resolve the endpoint, look up its tunnel, buffer the request body under
//! the configured limit, forward, and copy the agent's response back. Every
//! failure is answered immediately; nothing is retried or queued.

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, Method, Request, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::{debug, Instrument};

use crate::routing::host_without_port;
use crate::state::RelayState;

/// Header that names the target endpoint explicitly, overriding the host.
pub const ENDPOINT_HEADER: &str = "x-blackhole-endpoint";

/// Resolve the target endpoint of a request.
///
/// The [`ENDPOINT_HEADER`] wins when present and non-empty. Otherwise the
/// first label of the host (`svc1.example.com:443` → `svc1`) is used.
pub fn resolve_endpoint(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(ep) = headers
        .get(ENDPOINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return Some(ep.to_string());
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host())?;
    let host = host_without_port(host);
    let label = host.split('.').next().unwrap_or("");
    (!label.is_empty()).then(|| label.to_string())
}

/// `scheme://host/path?query` of the original request, for error messages.
fn request_url(parts: &Parts) -> String {
    let scheme = match parts
        .headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
    {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    };
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(|a| a.as_str()))
        .unwrap_or("");
    let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    format!("{scheme}://{host}{target}")
}

/// Forward one external request through its endpoint's tunnel.
pub async fn dispatch(state: RelayState, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();

    let Some(endpoint) = resolve_endpoint(&parts.headers, &parts.uri) else {
        return (
            StatusCode::BAD_REQUEST,
            "Missing X-Blackhole-Endpoint header or Host-based endpoint",
        )
            .into_response();
    };

    let Some(tunnel) = state.registry.get(&endpoint) else {
        debug!(endpoint = %endpoint, "No tunnel registered");
        return (
            StatusCode::BAD_GATEWAY,
            format!("No tunnel registered for {}", request_url(&parts)),
        )
            .into_response();
    };

    let limits = &state.config.server;
    let body: Bytes = match Limited::new(body, limits.max_request_body).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("Failed to read request body: {e}"),
            )
                .into_response();
        }
    };

    let method = parts.method.clone();

    // Detached so a vanished client cannot cancel a forward mid-exchange.
    let request = Request::from_parts(parts, body);
    let forward = tokio::spawn(async move { tunnel.forward(request).await }.in_current_span());

    let response = match forward.await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            debug!(endpoint = %endpoint, error = %e, "Tunnel forward failed");
            return (StatusCode::BAD_GATEWAY, format!("Tunnel error: {e}")).into_response();
        }
        Err(e) => {
            return (StatusCode::BAD_GATEWAY, format!("Tunnel error: {e}")).into_response();
        }
    };

    if response.body().len() > limits.max_response_body {
        debug!(
            endpoint = %endpoint,
            bytes = response.body().len(),
            "Response body over limit"
        );
        return (StatusCode::BAD_GATEWAY, "Response body too large").into_response();
    }

    let owner = state.registry.owner(&endpoint);
    debug!(
        endpoint = %endpoint,
        owner = owner.as_deref().unwrap_or("unattributed"),
        status = response.status().as_u16(),
        bytes = response.body().len(),
        "Forwarded request"
    );

    let (mut parts, body) = response.into_parts();
    parts.headers.remove(header::TRANSFER_ENCODING);
    // Bodiless answers keep the length the agent declared.
    if !is_bodiless(&method, parts.status) {
        parts.headers.remove(header::CONTENT_LENGTH);
    }
    Response::from_parts(parts, Body::from(body))
}

/// Responses that never carry a body, whatever their `Content-Length` says.
fn is_bodiless(method: &Method, status: StatusCode) -> bool {
    *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
}

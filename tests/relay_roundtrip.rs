//! End-to-end relay tests: a real listener, a fake agent over WebSocket, and
//! external HTTP clients.

use std::net::SocketAddr;
use std::time::Duration;

use bhole::{routing, Config, RelayState};
use futures::{SinkExt, StreamExt};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Agent = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OK_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 11\r\n\r\n{\"ok\":true}";

async fn start_relay(config: Config) -> (SocketAddr, RelayState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = RelayState::new(config);
    let app = routing::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn connect_agent(addr: SocketAddr) -> Agent {
    let (ws, _response) = tokio_tungstenite::connect_async(format!("ws://{addr}/tunnel"))
        .await
        .unwrap();
    ws
}

/// Next data frame from the relay, or `None` once the connection closes.
async fn next_frame(agent: &mut Agent) -> Option<Bytes> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), agent.next())
            .await
            .expect("agent read timed out")
        {
            Some(Ok(Message::Binary(data))) => return Some(data),
            Some(Ok(Message::Text(text))) => return Some(Bytes::from(text.as_str().to_owned())),
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Close(_)) | Err(_)) | None => return None,
        }
    }
}

async fn register(agent: &mut Agent, endpoint: &str, token: Option<&str>) -> Value {
    let mut hello = json!({"type": "register", "endpoint": endpoint});
    if let Some(token) = token {
        hello["authToken"] = json!(token);
    }
    agent
        .send(Message::Text(hello.to_string().into()))
        .await
        .unwrap();
    let ack = next_frame(agent).await.expect("no handshake reply");
    serde_json::from_slice(&ack).unwrap()
}

async fn http_get(addr: SocketAddr, path: &str, endpoint: Option<&str>) -> (StatusCode, Bytes) {
    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let mut req = Request::builder().uri(format!("http://{addr}{path}"));
    if let Some(endpoint) = endpoint {
        req = req.header("X-Blackhole-Endpoint", endpoint);
    }
    let resp = tokio::time::timeout(
        Duration::from_secs(5),
        client.request(req.body(Full::new(Bytes::new())).unwrap()),
    )
    .await
    .expect("request timed out")
    .unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

#[tokio::test]
async fn test_round_trip_through_agent() {
    let (addr, _state) = start_relay(Config::default()).await;
    let mut agent = connect_agent(addr).await;
    assert_eq!(register(&mut agent, "svc1", None).await, json!({"ok": true}));

    let agent_task = tokio::spawn(async move {
        let frame = next_frame(&mut agent).await.expect("no request frame");
        assert!(frame.starts_with(b"GET /health HTTP/1.1\r\n"));
        agent
            .send(Message::Binary(Bytes::from_static(OK_RESPONSE)))
            .await
            .unwrap();
        agent
    });

    let (status, body) = http_get(addr, "/health", Some("svc1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"{\"ok\":true}");
    agent_task.await.unwrap();
}

#[tokio::test]
async fn test_sequential_requests_reuse_tunnel() {
    let (addr, _state) = start_relay(Config::default()).await;
    let mut agent = connect_agent(addr).await;
    register(&mut agent, "svc1", None).await;

    tokio::spawn(async move {
        while let Some(frame) = next_frame(&mut agent).await {
            let path = frame
                .split(|b| *b == b' ')
                .nth(1)
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .unwrap_or_default();
            let reply = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{path}",
                path.len()
            );
            if agent.send(Message::Binary(reply.into())).await.is_err() {
                break;
            }
        }
    });

    for path in ["/a", "/b", "/c"] {
        let (status, body) = http_get(addr, path, Some("svc1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], path.as_bytes());
    }
}

#[tokio::test]
async fn test_rejects_bad_token() {
    let mut config = Config::default();
    config.auth.token = Some("s3cret".to_string());
    let (addr, state) = start_relay(config).await;

    let mut agent = connect_agent(addr).await;
    let reply = register(&mut agent, "svc1", Some("wrong")).await;
    assert_eq!(
        reply,
        json!({"error": "unauthorized: invalid or missing auth token"})
    );
    assert!(next_frame(&mut agent).await.is_none(), "connection closed");
    assert!(state.registry.get("svc1").is_none());

    let mut agent = connect_agent(addr).await;
    let reply = register(&mut agent, "svc1", Some("s3cret")).await;
    assert_eq!(reply, json!({"ok": true}));
}

#[tokio::test]
async fn test_unknown_endpoint_is_bad_gateway() {
    let (addr, _state) = start_relay(Config::default()).await;
    let (status, body) = http_get(addr, "/x?y=1", Some("nobody")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let text = String::from_utf8_lossy(&body);
    assert!(text.starts_with("No tunnel registered for http://"), "{text}");
    assert!(text.ends_with("/x?y=1"), "{text}");
}

#[tokio::test]
async fn test_replacement_closes_old_agent() {
    let (addr, state) = start_relay(Config::default()).await;
    let mut old = connect_agent(addr).await;
    register(&mut old, "svc1", None).await;

    let mut new = connect_agent(addr).await;
    register(&mut new, "svc1", None).await;

    assert!(next_frame(&mut old).await.is_none(), "old agent closed");
    // The old connection's teardown must not evict the new registration.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state.registry.len(), 1);

    tokio::spawn(async move {
        next_frame(&mut new).await.expect("request reaches new agent");
        new.send(Message::Binary(Bytes::from_static(OK_RESPONSE)))
            .await
            .unwrap();
        new
    });
    let (status, _body) = http_get(addr, "/", Some("svc1")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_agent_disconnect_mid_forward() {
    let (addr, state) = start_relay(Config::default()).await;
    let mut agent = connect_agent(addr).await;
    register(&mut agent, "svc1", None).await;

    tokio::spawn(async move {
        next_frame(&mut agent).await.expect("no request frame");
        drop(agent);
    });

    let (status, body) = http_get(addr, "/slow", Some("svc1")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(String::from_utf8_lossy(&body).starts_with("Tunnel error:"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.registry.get("svc1").is_none());
}

#[tokio::test]
async fn test_status_api_lists_tunnels() {
    let (addr, _state) = start_relay(Config::default()).await;
    let mut agent = connect_agent(addr).await;
    register(&mut agent, "svc1", None).await;

    let (status, body) = http_get(addr, "/api/tunnels", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({"tunnels": ["svc1"]}));

    let (status, body) = http_get(addr, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["tunnels"], 1);
}

#[tokio::test]
async fn test_drain_fails_waiting_forward() {
    let (addr, state) = start_relay(Config::default()).await;
    let mut agent = connect_agent(addr).await;
    register(&mut agent, "svc1", None).await;

    let drainer = state.clone();
    tokio::spawn(async move {
        next_frame(&mut agent).await.expect("no request frame");
        assert_eq!(drainer.registry.drain(), 1);
        // Hold the socket open; termination alone must release the waiter.
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(agent);
    });

    let (status, _body) = http_get(addr, "/", Some("svc1")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(state.registry.is_empty());
}

#[tokio::test]
async fn test_head_response_keeps_declared_length() {
    let (addr, _state) = start_relay(Config::default()).await;
    let mut agent = connect_agent(addr).await;
    register(&mut agent, "svc1", None).await;

    tokio::spawn(async move {
        let frame = next_frame(&mut agent).await.expect("no request frame");
        assert!(frame.starts_with(b"HEAD /file HTTP/1.1\r\n"));
        agent
            .send(Message::Binary(Bytes::from_static(
                b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nContent-Type: text/plain\r\n\r\n",
            )))
            .await
            .unwrap();
        agent
    });

    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let req = Request::builder()
        .method("HEAD")
        .uri(format!("http://{addr}/file"))
        .header("X-Blackhole-Endpoint", "svc1")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let resp = tokio::time::timeout(Duration::from_secs(5), client.request(req))
        .await
        .expect("request timed out")
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-length"], "5");
    assert_eq!(resp.headers()["content-type"], "text/plain");
}

//! Connection handlers for the umlsync server.
//!
//! This module wires the HTTP surface and handles the WebSocket connection
//! lifecycle. Every namespace is served by the same handler, parameterised by
//! [`Namespace`], against one shared [`EventRouter`].

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderValue,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use umlsync_core::{ConnectionId, EventRouter, Namespace, RelayError};
use umlsync_protocol::{codec, ServerEvent};

/// Shared server state.
pub struct AppState {
    /// The event router shared by all namespaces.
    pub router: EventRouter,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            router: EventRouter::new(),
            config,
        }
    }
}

/// Response body of the health endpoint.
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active_rooms: usize,
    total_users: usize,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config));
    let app = build_app(Arc::clone(&state))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("umlsync server listening on {}", addr);
    for (namespace, path) in state.config.endpoints() {
        info!(namespace = %namespace, "WebSocket endpoint: ws://{}{}", addr, path);
    }
    if state.config.allows_any_origin() {
        info!("CORS: all origins allowed");
    } else {
        info!("CORS: {}", state.config.cors.allowed_origins.join(", "));
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("umlsync server stopped");
    Ok(())
}

/// Build the application router.
///
/// # Errors
///
/// Returns an error if a configured CORS origin is not a valid header value.
pub fn build_app(state: Arc<AppState>) -> Result<Router> {
    let cors = cors_layer(&state.config)?;

    let mut app = Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ping", get(ping_handler));

    for (namespace, path) in state.config.endpoints() {
        app = app.route(
            path,
            get(
                move |ws: WebSocketUpgrade, State(state): State<Arc<AppState>>| {
                    ws_handler(ws, state, namespace)
                },
            ),
        );
    }

    Ok(app
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

fn cors_layer(config: &Config) -> Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.allows_any_origin() {
        return Ok(layer.allow_origin(Any));
    }

    let origins = config
        .cors
        .allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("Invalid CORS origin: {}", origin))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(layer.allow_origin(AllowOrigin::list(origins)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Service information handler.
async fn index_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "PlantUML Collaboration Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let stats = state.router.stats();
    Json(HealthResponse {
        status: "ok",
        active_rooms: stats.room_count,
        total_users: stats.total_members,
    })
}

/// Liveness ping handler.
async fn ping_handler() -> &'static str {
    "pong"
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, state: Arc<AppState>, namespace: Namespace) -> Response {
    let limit = state.config.limits.max_message_size;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_upgrade(move |socket| handle_websocket(socket, state, namespace))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>, namespace: Namespace) {
    let _metrics_guard = ConnectionMetricsGuard::new(namespace);

    let connection_id = ConnectionId::generate();
    let mut outbound = state.router.connect(&connection_id);
    info!(connection = %connection_id, namespace = %namespace, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            biased;

            // Events queued for this connection by any namespace
            Some(event) = outbound.recv() => {
                if let Err(e) = send_event(&mut sender, &event).await {
                    debug!(connection = %connection_id, error = %e, "Failed to deliver event");
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let start = Instant::now();
                        metrics::record_bytes(text.len(), "inbound");
                        let outcome = state.router.handle_text(&connection_id, &text);
                        record_outcome(&state, &connection_id, outcome);
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        metrics::record_bytes(data.len(), "inbound");
                        let outcome = state.router.handle_bytes(&connection_id, &data);
                        record_outcome(&state, &connection_id, outcome);
                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.router.disconnect(&connection_id);
    metrics::set_active_rooms(state.router.registry().room_count());

    info!(connection = %connection_id, namespace = %namespace, "WebSocket disconnected");
}

fn record_outcome(
    state: &AppState,
    connection_id: &ConnectionId,
    outcome: Result<&'static str, RelayError>,
) {
    match outcome {
        Ok(event) => metrics::record_event(event),
        Err(e) => {
            metrics::record_error(e.kind());
            state.router.report_error(connection_id, &e);
        }
    }
    metrics::set_active_rooms(state.router.registry().room_count());
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let text = codec::encode(event)?;
    metrics::record_bytes(text.len(), "outbound");
    sender.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
    use umlsync_protocol::ClientEvent;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
        let mut config = Config::default();
        config.metrics.enabled = false;

        let state = Arc::new(AppState::new(config));
        let app = build_app(Arc::clone(&state)).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, state)
    }

    async fn connect(addr: SocketAddr, path: &str) -> (Client, String) {
        let (mut ws, _) = connect_async(format!("ws://{}{}", addr, path))
            .await
            .unwrap();
        match next_event(&mut ws).await {
            ServerEvent::Connected { sid } => (ws, sid),
            other => panic!("Expected connected, got {:?}", other),
        }
    }

    async fn next_event(ws: &mut Client) -> ServerEvent {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for event")
                .expect("connection closed")
                .expect("websocket error");
            if let WsMessage::Text(text) = msg {
                return codec::decode_server(&text).unwrap();
            }
        }
    }

    async fn send(ws: &mut Client, event: &ClientEvent) {
        let text = codec::encode(event).unwrap();
        ws.send(WsMessage::Text(text)).await.unwrap();
    }

    async fn wait_for(state: &AppState, check: impl Fn(&EventRouter) -> bool) {
        for _ in 0..200 {
            if check(&state.router) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    async fn http_get(addr: SocketAddr, path: &str) -> (String, String) {
        http_request(addr, "GET", path).await
    }

    async fn http_request(addr: SocketAddr, method: &str, path: &str) -> (String, String) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            method, path, addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        let (head, body) = raw.split_once("\r\n\r\n").unwrap();
        let status = head.lines().next().unwrap_or_default().to_string();
        (status, body.to_string())
    }

    #[tokio::test]
    async fn test_namespaces_share_rooms() {
        let (addr, state) = spawn_server().await;

        let (mut a, sid_a) = connect(addr, "/ws").await;
        send(&mut a, &ClientEvent::join("diag1")).await;
        wait_for(&state, |r| r.registry().member_count("diag1") == 1).await;

        let (mut b, sid_b) = connect(addr, "/plantuml-sync").await;
        send(&mut b, &ClientEvent::join("diag1")).await;
        assert_eq!(next_event(&mut a).await, ServerEvent::user_joined(&sid_b, 2));

        send(
            &mut b,
            &ClientEvent::diagram_update("diag1", "@startuml\n@enduml", Some(json!(5))),
        )
        .await;
        assert_eq!(
            next_event(&mut a).await,
            ServerEvent::diagram_update("@startuml\n@enduml", Some(json!(5)), &sid_b)
        );

        send(&mut a, &ClientEvent::cursor_update("diag1", Some(json!(9)))).await;
        assert_eq!(
            next_event(&mut b).await,
            ServerEvent::cursor_update(Some(json!(9)), &sid_a)
        );

        let (mut c, _) = connect(addr, "/ws").await;
        send(&mut c, &ClientEvent::join("diag1")).await;
        assert_eq!(
            next_event(&mut c).await,
            ServerEvent::snapshot("@startuml\n@enduml")
        );

        b.close(None).await.unwrap();
        // A saw C join before B left.
        assert!(matches!(
            next_event(&mut a).await,
            ServerEvent::UserJoined { users_count: 3, .. }
        ));
        assert_eq!(next_event(&mut a).await, ServerEvent::user_disconnected(&sid_b));
        wait_for(&state, |r| r.registry().member_count("diag1") == 2).await;
    }

    #[tokio::test]
    async fn test_malformed_message_keeps_connection_open() {
        let (addr, state) = spawn_server().await;
        let (mut a, _) = connect(addr, "/plantuml-sync").await;

        a.send(WsMessage::Text("not json".into())).await.unwrap();
        assert_eq!(next_event(&mut a).await, ServerEvent::internal_error());

        send(&mut a, &ClientEvent::join("still-here")).await;
        wait_for(&state, |r| r.registry().room_exists("still-here")).await;
    }

    #[tokio::test]
    async fn test_binary_frames_are_decoded_like_text() {
        let (addr, state) = spawn_server().await;
        let (mut a, _) = connect(addr, "/ws").await;

        let join = codec::encode(&ClientEvent::join("bin-room")).unwrap();
        a.send(WsMessage::Binary(join.into_bytes())).await.unwrap();
        wait_for(&state, |r| r.registry().member_count("bin-room") == 1).await;

        a.send(WsMessage::Binary(vec![0xff, 0xfe])).await.unwrap();
        assert_eq!(next_event(&mut a).await, ServerEvent::internal_error());
        assert_eq!(state.router.registry().member_count("bin-room"), 1);
    }

    #[tokio::test]
    async fn test_health_reports_registry_counts() {
        let (addr, state) = spawn_server().await;
        let (mut a, _) = connect(addr, "/ws").await;
        let (mut b, _) = connect(addr, "/plantuml-sync").await;

        send(&mut a, &ClientEvent::join("r1")).await;
        send(&mut a, &ClientEvent::join("r2")).await;
        send(&mut b, &ClientEvent::diagram_update("r1", "x", None)).await;
        wait_for(&state, |r| r.stats().total_members == 3).await;

        let (status, body) = http_get(addr, "/health").await;
        assert!(status.contains("200"), "{}", status);
        let health: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            health,
            json!({"status": "ok", "active_rooms": 2, "total_users": 3})
        );
    }

    #[tokio::test]
    async fn test_ping_index_and_head_requests() {
        let (addr, _state) = spawn_server().await;

        let (status, body) = http_get(addr, "/ping").await;
        assert!(status.contains("200"));
        assert_eq!(body, "pong");

        for path in ["/health", "/ping"] {
            let (status, body) = http_request(addr, "HEAD", path).await;
            assert!(status.contains("200"), "HEAD {}: {}", path, status);
            assert!(body.is_empty());
        }

        let (_, body) = http_get(addr, "/").await;
        let info: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(info["status"], "running");
        assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_cors_rejects_invalid_origin() {
        let mut config = Config::default();
        config.cors.allowed_origins = vec!["https://ok.example".to_string()];
        assert!(cors_layer(&config).is_ok());

        config.cors.allowed_origins = vec!["bad\norigin".to_string()];
        assert!(cors_layer(&config).is_err());
    }
}

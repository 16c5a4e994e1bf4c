use crate::realtime_logic::config::Settings;
use crate::realtime_logic::model::{ConnectQuery, FanoutAck, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use futures_util::StreamExt;
use lib_common::core::{Dispatcher, ServerEvent};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub async fn run(
    settings: Settings,
    dispatcher: Dispatcher,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = router(dispatcher, &settings.allowed_origins);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    log::info!("Realtime server listening on {}", addr);

    if let Some((cert_path, key_path)) = settings.tls {
        let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
            .await
            .with_context(|| format!("Failed to load TLS configuration from {}", cert_path.display()))?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown.recv().await.ok();
            log::info!("Realtime server shutting down.");
            shutdown_handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        log::info!("TLS enabled");
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("TLS server failed")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.recv().await.ok();
                log::info!("Realtime server shutting down.");
            })
            .await
            .context("Server failed")?;
    }

    Ok(())
}

/// All HTTP and websocket routes, with CORS applied.
pub fn router(dispatcher: Dispatcher, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/presence", get(presence_handler))
        .route("/api/live", get(live_handler))
        .route("/api/rooms/{room}/messages", post(message_handler))
        .layer(cors_layer(allowed_origins))
        .with_state(dispatcher)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(dispatcher): State<Dispatcher>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, dispatcher, query.user_id))
}

async fn health_handler(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    Json(HealthStatus {
        status: "OK".to_string(),
        online_users: dispatcher.online_count(),
        connections: dispatcher.connection_count(),
        live_sessions: dispatcher.live_directory().len(),
    })
}

async fn presence_handler(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    Json(dispatcher.presence_snapshot())
}

async fn live_handler(State(dispatcher): State<Dispatcher>) -> impl IntoResponse {
    Json(dispatcher.live_directory())
}

// Called by the persistence layer once a chat message is stored.
async fn message_handler(
    State(dispatcher): State<Dispatcher>,
    Path(room): Path<String>,
    Json(message): Json<Value>,
) -> impl IntoResponse {
    let delivered = dispatcher.broadcast_message(&room, message);
    log::debug!("Message for room '{}' fanned out to {} connection(s)", room, delivered);
    (StatusCode::ACCEPTED, Json(FanoutAck { room, delivered }))
}

async fn handle_socket(mut socket: WebSocket, dispatcher: Dispatcher, user_id: Option<String>) {
    let (connection_id, mut events) = dispatcher.connect(user_id.as_deref());

    loop {
        tokio::select! {
            // Handle incoming messages from the client
            msg = socket.next() => {
                let Some(Ok(msg)) = msg else {
                    // client disconnected
                    break;
                };
                match msg {
                    Message::Text(text) => {
                        if let Err(e) = dispatcher.handle_text(&connection_id, text.as_str()) {
                            log::warn!("Rejected event from {}: {}", connection_id, e);
                            dispatcher.deliver_to_connection(
                                &connection_id,
                                ServerEvent::Error { message: e.to_string() },
                            );
                        }
                    }
                    Message::Ping(payload) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        break;
                    }
                    _ => {}
                }
            }
            // Forward events routed to this connection
            Some(event) = events.recv() => {
                let json_str = match event.to_json() {
                    Ok(json_str) => json_str,
                    Err(e) => {
                        log::error!("Failed to encode '{}' for {}: {}", event.name(), connection_id, e);
                        continue;
                    }
                };
                if socket.send(Message::Text(json_str.into())).await.is_err() {
                    break; // client disconnected
                }
            }
        }
    }

    dispatcher.disconnect(&connection_id);
}

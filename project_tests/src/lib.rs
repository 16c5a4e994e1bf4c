//! Shared helpers for the integration tests under `tests/`.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::{SinkExt, StreamExt};
use lib_common::core::{Dispatcher, EventReceiver, ServerEvent};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Everything currently queued for a connection, oldest first.
pub fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push((*event).clone());
    }
    out
}

/// Queued events with the given wire name.
pub fn drain_named(rx: &mut EventReceiver, name: &str) -> Vec<ServerEvent> {
    drain(rx).into_iter().filter(|e| e.name() == name).collect()
}

/// Serves the full router on an ephemeral loopback port.
pub async fn spawn_server(dispatcher: Dispatcher) -> Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = servers::realtime_logic::downstream::router(dispatcher, &["*".to_string()]);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("test server stopped: {}", e);
        }
    });
    Ok(addr)
}

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect_client(addr: SocketAddr, user_id: Option<&str>) -> Result<Client> {
    let url = match user_id {
        Some(user_id) => format!("ws://{}/ws?userId={}", addr, user_id),
        None => format!("ws://{}/ws", addr),
    };
    let (client, _) = tokio_tungstenite::connect_async(url).await?;
    Ok(client)
}

pub async fn send_event(client: &mut Client, event: &str, data: Value) -> Result<()> {
    let frame = serde_json::json!({ "event": event, "data": data });
    client.send(Message::Text(frame.to_string().into())).await?;
    Ok(())
}

async fn next_named(client: &mut Client, event: &str) -> Result<Value> {
    while let Some(frame) = client.next().await {
        if let Message::Text(text) = frame? {
            let value: Value = serde_json::from_str(text.as_str())?;
            if value["event"] == event {
                return Ok(value["data"].clone());
            }
        }
    }
    Err(anyhow!("connection closed before '{}' arrived", event))
}

/// Reads frames until one named `event` arrives, returning its `data`.
pub async fn expect_event(client: &mut Client, event: &str) -> Result<Value> {
    tokio::time::timeout(Duration::from_secs(5), next_named(client, event))
        .await
        .map_err(|_| anyhow!("timed out waiting for '{}'", event))?
}

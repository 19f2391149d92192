//! Web session protocol (spec §6): one WebSocket per Instance, carrying the
//! exact JSON message shapes the spec pins.
//!
//! Grounded on `other_examples/bf0d0c34_layercodedev-pigs__src-dashboard.rs.rs`'s
//! `session_stream` (`socket.split()` + `tokio::select!` between the
//! inbound client stream and an outbound update channel) — the teacher's
//! own `metrics_websocket` never actually upgrades, it just returns
//! connection info, so the live-socket idiom is drawn from the pack instead.

use super::{TerminalMonitor, TerminalUpdate};
use crate::store::InstanceStatus;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::debug;

pub fn router(monitor: Arc<TerminalMonitor>) -> Router {
    Router::new()
        .route("/ws/:title", get(session_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(monitor)
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[allow(dead_code)]
    format: Option<String>,
    privileges: Option<String>,
}

async fn session_upgrade(
    Path(title): Path<String>,
    Query(query): Query<SessionQuery>,
    State(monitor): State<Arc<TerminalMonitor>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let read_write = query.privileges.as_deref() == Some("read-write");
    ws.on_upgrade(move |socket| session_stream(socket, monitor, title, read_write))
}

#[derive(Serialize)]
struct ConfigMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    instance_title: String,
    status: Option<InstanceStatus>,
    read_write: bool,
}

#[derive(Serialize)]
struct ScreenUpdateMessage {
    content: String,
    instance_title: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    status: InstanceStatus,
    has_prompt: bool,
}

#[derive(Serialize)]
struct TerminatedMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    instance_title: String,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponseMessage {
    #[serde(rename = "type")]
    kind: &'static str,
    error: String,
}

/// Client → Server: `{content:"bytes", isCommand:false}` for keystrokes,
/// `{isCommand:true, content:"resize", cols, rows}` for geometry, and the
/// optional `{isCommand:true, content:"clear_terminal"}`.
#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(default, rename = "isCommand")]
    is_command: bool,
    content: String,
    cols: Option<u16>,
    rows: Option<u16>,
}

impl From<&TerminalUpdate> for ScreenUpdateMessage {
    fn from(update: &TerminalUpdate) -> Self {
        Self {
            content: update.content.clone(),
            instance_title: update.title.clone(),
            timestamp: update.timestamp,
            status: update.status,
            has_prompt: update.has_prompt,
        }
    }
}

async fn session_stream(
    socket: WebSocket,
    monitor: Arc<TerminalMonitor>,
    title: String,
    read_write: bool,
) {
    let (mut sender, mut receiver) = socket.split();

    let config = ConfigMessage {
        kind: "config",
        instance_title: title.clone(),
        status: monitor.current_status(&title).await,
        read_write,
    };
    if send_json(&mut sender, &config).await.is_err() {
        return;
    }

    if config.status.is_none() {
        let terminated = TerminatedMessage {
            kind: "instance_terminated",
            instance_title: title.clone(),
            message: format!("no instance named '{title}'"),
        };
        let _ = send_json(&mut sender, &terminated).await;
        return;
    }

    let (handle, mut updates) = monitor.subscribe(&title).await;

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        if handle_client_message(&monitor, &title, &text, read_write, &mut sender).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
            update = updates.recv() => {
                match update {
                    Some(update) => {
                        let message = ScreenUpdateMessage::from(&update);
                        if send_json(&mut sender, &message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    monitor.unsubscribe(&handle).await;
    debug!(title = %title, "web session gateway stream closed");
}

async fn handle_client_message(
    monitor: &TerminalMonitor,
    title: &str,
    text: &str,
    read_write: bool,
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) -> Result<(), axum::Error> {
    let Ok(msg) = serde_json::from_str::<ClientMessage>(text) else {
        return Ok(());
    };

    if !read_write {
        let error = ErrorResponseMessage {
            kind: "error_response",
            error: "session is read-only".to_string(),
        };
        return send_json(sender, &error).await;
    }

    if !msg.is_command {
        if let Err(e) = monitor.send_input(title, &msg.content).await {
            let error = ErrorResponseMessage {
                kind: "error_response",
                error: e.to_string(),
            };
            return send_json(sender, &error).await;
        }
        return Ok(());
    }

    match msg.content.as_str() {
        "resize" => {
            if let (Some(cols), Some(rows)) = (msg.cols, msg.rows) {
                if let Err(e) = monitor.resize_terminal(title, cols, rows).await {
                    let error = ErrorResponseMessage {
                        kind: "error_response",
                        error: e.to_string(),
                    };
                    return send_json(sender, &error).await;
                }
            }
        }
        "clear_terminal" => {
            // Optional per spec §6; the core does not define terminal-local
            // clearing, so this is a no-op acknowledged at the protocol level.
        }
        _ => {}
    }
    Ok(())
}

async fn send_json(
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    value: &impl Serialize,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(value).unwrap_or_default();
    sender.send(Message::Text(text)).await
}

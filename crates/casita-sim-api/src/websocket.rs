//! WebSocket handler for real-time tick updates

use automation_engine::TickReport;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use crate::sessions::LiveSession;

/// WebSocket events sent to clients
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent<'a> {
    Connected { username: &'a str },
    Tick { report: &'a TickReport },
}

/// Forward a session's tick reports until the client disconnects
pub async fn handle_socket(socket: WebSocket, username: String, live: Arc<LiveSession>) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribed before `connected` so no report after it is missed
    let mut updates = live.subscribe();
    drop(live);

    let connected = match serde_json::to_string(&WsEvent::Connected {
        username: &username,
    }) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!("Failed to encode connected event: {}", e);
            return;
        }
    };
    if sender.send(Message::Text(connected)).await.is_err() {
        return;
    }

    let send_task = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(report) => {
                    let json = match serde_json::to_string(&WsEvent::Tick { report: &report }) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!("Failed to encode tick report: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("WebSocket client lagged by {} reports", n);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    });

    // Incoming messages are ignored; commands go through the HTTP API
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    tracing::debug!("WebSocket for {} closed", username);
}

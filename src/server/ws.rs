//! Observer WebSocket
//!
//! Each socket is one observer: it receives the replay on connect, then live
//! output and status events as JSON text frames. Incoming frames are input,
//! resize, or status requests. Non-JSON text and binary frames are raw input.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use super::ServerAppState;
use crate::hub::ClientMessage;
use crate::supervisor::ProcessSupervisor;

/// WebSocket upgrade handler; the token was already checked by `AuthLayer`
pub async fn observer_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerAppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer(socket, state))
}

async fn handle_observer(socket: WebSocket, state: ServerAppState) {
    let supervisor = state.supervisor.clone();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (connection, mut events) = supervisor.attach();
    let observer_id = connection.id();
    drop(connection);
    log::info!("Observer connected: {}", observer_id);

    // Task: forward hub events to the socket
    let output_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    log::warn!("Failed to serialize observer event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => handle_text(&supervisor, observer_id, text),
            Ok(Message::Binary(data)) => {
                supervisor.route_input(observer_id, data);
            }
            Ok(Message::Close(_)) => {
                log::debug!("Observer requested close: {}", observer_id);
                break;
            }
            Err(e) => {
                log::warn!("Observer WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    output_task.abort();
    supervisor.detach(observer_id);
    log::info!("Observer disconnected: {}", observer_id);
}

fn handle_text(supervisor: &ProcessSupervisor, observer_id: Uuid, text: String) {
    match serde_json::from_str::<ClientMessage>(&text) {
        Ok(ClientMessage::Input { data }) => {
            supervisor.route_input(observer_id, data.into_bytes());
        }
        Ok(ClientMessage::Resize { cols, rows }) => {
            if !supervisor.resize(cols, rows) {
                log::debug!("Ignored resize to {}x{}", cols, rows);
            }
        }
        Ok(ClientMessage::RequestStatus) => {
            supervisor.request_status(observer_id);
        }
        Err(e) if is_json_object(&text) => {
            log::debug!("Ignoring malformed control message: {}", e);
        }
        Err(_) => {
            // Not JSON at all, treat as raw input
            supervisor.route_input(observer_id, text.into_bytes());
        }
    }
}

fn is_json_object(text: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(text),
        Ok(serde_json::Value::Object(_))
    )
}

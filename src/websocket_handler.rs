use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::state::AppState;

/// Messages a status page may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { session_id: String },
}

/// GET /api/checkout/status upgrades to a WebSocket that streams
/// subscription status updates for checkout sessions.
pub async fn checkout_status_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Forwards queued messages to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sender.send(Message::Text(message.into())).await.is_err() {
                break;
            }
        }
    });

    let subscribed: Arc<Mutex<Vec<String>>> = Arc::default();
    let feed = state.status_feed.clone();
    let watcher = tx.clone();
    let sessions = subscribed.clone();
    let mut receive_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Subscribe { session_id }) => {
                    info!("Client subscribed to status updates for: {}", session_id);
                    feed.register_client(session_id.clone(), tx.clone()).await;
                    sessions.lock().await.push(session_id.clone());

                    let confirmation = json!({
                        "type": "subscription_confirmed",
                        "session_id": session_id,
                    })
                    .to_string();
                    if tx.send(confirmation).is_err() {
                        break;
                    }
                }
                Err(e) => error!("Ignoring WebSocket message {}: {e}", text.as_str()),
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => {
            receive_task.abort();
            // Let the abort land so no subscription registers after cleanup.
            let _ = (&mut receive_task).await;
        }
        _ = (&mut receive_task) => send_task.abort(),
    }

    for session_id in subscribed.lock().await.iter() {
        state.status_feed.unregister_client(session_id, &watcher).await;
    }

    info!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_message_parses() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","session_id":"cs_test_1"}"#).unwrap();
        let ClientMessage::Subscribe { session_id } = message;
        assert_eq!(session_id, "cs_test_1");
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).is_err());
    }
}

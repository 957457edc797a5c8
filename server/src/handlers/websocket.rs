//! WebSocket handler for live document updates.
//!
//! Handles WebSocket connections and dispatches messages to the document
//! handlers while forwarding hub changes for subscribed documents.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::db;
use crate::document::DocumentId;
use crate::error::AppError;
use crate::websocket::{Change, ClientMessage, ServerMessage};
use crate::AppState;

use super::write_document;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the hub
/// 2. Spawns a task that writes replies and changes to the socket
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (change_tx, mut change_rx) = mpsc::unbounded_channel::<Change>();

    let conn_id = state.hub.register(change_tx);
    tracing::info!(conn_id = %conn_id, "WebSocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(reply) = reply_rx.recv() => reply,
                Some(change) = change_rx.recv() => ServerMessage::Changed {
                    collection: change.document.collection,
                    key: change.document.key,
                    value: change.value,
                    revision: change.revision,
                },
                else => break,
            };
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response = process_message(&text, &state, &conn_id).await;
                if reply_tx.send(response).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    state.hub.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = state.hub.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return a server response.
pub async fn process_message(text: &str, state: &AppState, conn_id: &str) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Subscribe {
            collection,
            key,
            request_id,
        } => {
            let id = match DocumentId::parse(&collection, &key) {
                Ok(id) => id,
                Err(e) => return ServerMessage::error(e.public_message(), request_id),
            };
            state.hub.subscribe(conn_id, id.clone());
            document_message(state, id, request_id).await
        }

        ClientMessage::Unsubscribe {
            collection,
            key,
            request_id,
        } => match DocumentId::parse(&collection, &key) {
            Ok(id) => {
                state.hub.unsubscribe(conn_id, &id);
                ServerMessage::Ack {
                    revision: None,
                    request_id,
                }
            }
            Err(e) => ServerMessage::error(e.public_message(), request_id),
        },

        ClientMessage::Get {
            collection,
            key,
            request_id,
        } => match DocumentId::parse(&collection, &key) {
            Ok(id) => document_message(state, id, request_id).await,
            Err(e) => ServerMessage::error(e.public_message(), request_id),
        },

        ClientMessage::Put {
            collection,
            key,
            value,
            request_id,
        } => {
            let id = match DocumentId::parse(&collection, &key) {
                Ok(id) => id,
                Err(e) => return ServerMessage::error(e.public_message(), request_id),
            };
            match write_document(state, &id, value).await {
                Ok(revision) => ServerMessage::Ack {
                    revision,
                    request_id,
                },
                Err(e) => ServerMessage::error(e.public_message(), request_id),
            }
        }

        ClientMessage::Ping => ServerMessage::Pong,
    }
}

async fn document_message(
    state: &AppState,
    id: DocumentId,
    request_id: Option<String>,
) -> ServerMessage {
    match db::get_document(&state.pool, &id).await {
        Ok(doc) => ServerMessage::Document {
            revision: doc.as_ref().map(|d| d.wire_revision()).unwrap_or(0),
            value: doc.and_then(|d| d.value),
            collection: id.collection,
            key: id.key,
            request_id,
        },
        Err(e) => ServerMessage::error(AppError::from(e).public_message(), request_id),
    }
}

//! WebSocket handler for real-time sync.
//!
//! Handles WebSocket connections of one group and dispatches their messages
//! to the group registry while relaying merged changes to the other members.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use listsync_engine::{ClientMessage, ServerMessage};
use tokio::sync::mpsc;

use crate::groups::GroupRegistry;
use crate::websocket::ConnectionManager;

use super::handle_push;

/// Handle an established WebSocket connection.
///
/// This function:
/// 1. Registers the connection with the manager under its group
/// 2. Spawns a task to forward outgoing messages
/// 3. Processes incoming messages in a loop
/// 4. Cleans up on disconnect
pub async fn handle_websocket_connection(
    socket: WebSocket,
    groups: Arc<GroupRegistry>,
    conn_manager: Arc<ConnectionManager>,
    group_id: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create channel for sending messages to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(group_id.clone(), tx);

    tracing::info!(
        conn_id = %conn_id,
        group_id = %group_id,
        "WebSocket client connected"
    );

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
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

    // Process incoming messages
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let response =
                    process_message(text.as_str(), &groups, &conn_manager, &conn_id, &group_id);
                conn_manager.send_to(&conn_id, response);
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
                conn_manager.send_to(
                    &conn_id,
                    ServerMessage::error("Binary messages are not supported", None),
                );
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
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

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        group_id = %group_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return the reply for the same connection.
fn process_message(
    text: &str,
    groups: &GroupRegistry,
    conn_manager: &ConnectionManager,
    conn_id: &str,
    group_id: &str,
) -> ServerMessage {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            return ServerMessage::error(format!("Invalid message format: {}", e), None);
        }
    };

    match client_msg {
        ClientMessage::Load { request_id } => {
            let content = groups.load(group_id);
            tracing::debug!(
                conn_id = %conn_id,
                cells = content.cell_count(),
                "Serving group snapshot"
            );
            ServerMessage::Snapshot {
                content,
                request_id,
            }
        }

        ClientMessage::Push {
            changes,
            request_id,
        } => match handle_push(groups, conn_manager, group_id, Some(conn_id), changes) {
            Ok(_) => ServerMessage::Ack { request_id },
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "Rejected push: {}", e);
                ServerMessage::error(e.to_string(), request_id)
            }
        },

        ClientMessage::Ping => ServerMessage::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_engine::{row, MergeableStore, Schema};

    fn setup() -> (GroupRegistry, ConnectionManager, String, mpsc::UnboundedReceiver<ServerMessage>) {
        let groups = GroupRegistry::new(Schema::todo_app());
        let manager = ConnectionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let other = manager.register("family".into(), tx);
        (groups, manager, other, rx)
    }

    #[test]
    fn load_push_and_ping() {
        let (groups, manager, _other, mut other_rx) = setup();

        let reply = process_message(
            r#"{"type":"load","request_id":"r1"}"#,
            &groups,
            &manager,
            "me",
            "family",
        );
        match reply {
            ServerMessage::Snapshot {
                content,
                request_id,
            } => {
                assert!(content.is_empty());
                assert_eq!(request_id.as_deref(), Some("r1"));
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }

        let mut client = MergeableStore::new("phone", Schema::todo_app());
        client
            .set_row("lists", "L1", row([("title", "Groceries".into())]))
            .unwrap();
        let push = ClientMessage::Push {
            changes: client.take_outbox(),
            request_id: Some("r2".into()),
        };
        let reply = process_message(
            &serde_json::to_string(&push).unwrap(),
            &groups,
            &manager,
            "me",
            "family",
        );
        assert_eq!(
            reply,
            ServerMessage::Ack {
                request_id: Some("r2".into())
            }
        );
        assert!(matches!(
            other_rx.try_recv(),
            Ok(ServerMessage::Changes { .. })
        ));

        let reply = process_message(r#"{"type":"ping"}"#, &groups, &manager, "me", "family");
        assert_eq!(reply, ServerMessage::Pong);
    }

    #[test]
    fn malformed_messages_get_error_replies() {
        let (groups, manager, _other, mut other_rx) = setup();

        let reply = process_message("not json", &groups, &manager, "me", "family");
        assert!(matches!(reply, ServerMessage::Error { .. }));

        // Wrong cell type: rejected, nothing stored, nothing relayed
        let push = r#"{"type":"push","request_id":"r3","changes":{"tables":{"lists":{"L1":
            {"cells":{"title":{"value":7,"time":{"counter":1,"replica":"phone"}}}}}}}}"#;
        let reply = process_message(push, &groups, &manager, "me", "family");
        match reply {
            ServerMessage::Error { request_id, .. } => {
                assert_eq!(request_id.as_deref(), Some("r3"))
            }
            other => panic!("Expected error, got {:?}", other),
        }
        assert!(groups.load("family").is_empty());
        assert!(other_rx.try_recv().is_err());
    }
}

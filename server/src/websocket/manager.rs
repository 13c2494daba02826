//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections per sync group and relays merged
//! changes to the other members of a group.

use std::sync::Arc;

use dashmap::DashMap;
use listsync_engine::ServerMessage;
use tokio::sync::mpsc;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Group the connection syncs
    pub group_id: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    /// All active connections, keyed by connection ID.
    connections: DashMap<String, Connection>,
    /// Connection IDs by group.
    by_group: DashMap<String, Vec<String>>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, group_id: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        let connection = Connection {
            id: conn_id.clone(),
            group_id: group_id.clone(),
            sender,
        };
        self.connections.insert(conn_id.clone(), connection);
        self.by_group
            .entry(group_id.clone())
            .or_default()
            .push(conn_id.clone());

        tracing::info!(conn_id = %conn_id, group_id = %group_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection.
    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            if let Some(mut conn_ids) = self.by_group.get_mut(&conn.group_id) {
                conn_ids.retain(|id| id != conn_id);
                if conn_ids.is_empty() {
                    drop(conn_ids);
                    self.by_group
                        .remove_if(&conn.group_id, |_, ids| ids.is_empty());
                }
            }

            tracing::info!(conn_id = %conn_id, group_id = %conn.group_id, "WebSocket connection unregistered");
        }
    }

    /// Send a message to every connection of a group except the sender.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast_except(
        &self,
        group_id: &str,
        sender_conn_id: &str,
        message: ServerMessage,
    ) -> usize {
        let recipients: Vec<String> = match self.by_group.get(group_id) {
            Some(ids) => ids
                .iter()
                .filter(|id| id.as_str() != sender_conn_id)
                .cloned()
                .collect(),
            None => return 0,
        };

        let sent_count = recipients
            .iter()
            .filter(|id| self.send_to(id, message.clone()))
            .count();

        tracing::debug!(
            group_id = %group_id,
            sender = %sender_conn_id,
            recipients = sent_count,
            "Broadcast message to group"
        );

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        match self.connections.get(conn_id) {
            Some(conn) => conn.sender.send(message).is_ok(),
            None => false,
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of connections syncing one group.
    pub fn group_connection_count(&self, group_id: &str) -> usize {
        self.by_group.get(group_id).map_or(0, |ids| ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister() {
        let manager = ConnectionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn_id = manager.register("family".to_string(), tx);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.group_connection_count("family"), 1);

        manager.unregister(&conn_id);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.group_connection_count("family"), 0);
    }

    #[test]
    fn test_broadcast_except() {
        let manager = ConnectionManager::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (tx3, mut rx3) = mpsc::unbounded_channel();

        let conn1 = manager.register("family".to_string(), tx1);
        let _conn2 = manager.register("family".to_string(), tx2);
        let _conn3 = manager.register("work".to_string(), tx3);

        // Broadcast from conn1 should only reach conn2
        let sent = manager.broadcast_except("family", &conn1, ServerMessage::Pong);
        assert_eq!(sent, 1);

        assert!(rx1.try_recv().is_err());
        assert!(matches!(rx2.try_recv().unwrap(), ServerMessage::Pong));
        // Other groups never see it
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_to_unknown_group() {
        let manager = ConnectionManager::new();
        assert_eq!(manager.broadcast_except("nobody", "x", ServerMessage::Pong), 0);
    }
}

//! Authenticated connection management.

use crate::error::GatewayError;
use crate::room::RoomSet;
use crate::service::Identity;
use necho_types::{ChatId, ServerFrame};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Unique identifier for a live connection.
pub type ConnectionId = String;

/// A live connection bound to exactly one authenticated user.
///
/// Room membership is only mutated by the gateway that owns the connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique connection identifier.
    pub id: ConnectionId,
    /// The user this connection belongs to for its whole lifetime.
    pub identity: Identity,
    /// Channel for sending frames to this connection.
    sender: mpsc::UnboundedSender<String>,
    /// Joined chat rooms.
    rooms: RwLock<RoomSet>,
    /// Connection metadata.
    pub metadata: ConnectionMetadata,
}

impl Connection {
    /// Create a new connection with a frame sender.
    pub fn new(
        id: ConnectionId,
        identity: Identity,
        sender: mpsc::UnboundedSender<String>,
        metadata: ConnectionMetadata,
    ) -> Self {
        Self {
            id,
            identity,
            sender,
            rooms: RwLock::new(RoomSet::new()),
            metadata,
        }
    }

    /// The bound user's id.
    pub fn user_id(&self) -> &str {
        &self.identity.user_id
    }

    /// Send raw text to this connection.
    pub fn send(&self, message: String) -> Result<(), GatewayError> {
        self.sender
            .send(message)
            .map_err(|_| GatewayError::ChannelClosed)
    }

    /// Serialize and send a frame.
    pub fn send_frame(&self, frame: &ServerFrame) -> Result<(), GatewayError> {
        let json = serde_json::to_string(frame)?;
        self.send(json)
    }

    /// Check if the connection has joined a chat's room.
    pub fn in_room(&self, chat_id: &str) -> bool {
        self.rooms.read().contains(chat_id)
    }

    /// Joined rooms.
    pub fn joined_rooms(&self) -> Vec<ChatId> {
        self.rooms.read().rooms().cloned().collect()
    }

    /// Number of joined rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.read().count()
    }

    pub(crate) fn join_room(&self, chat_id: ChatId) -> Result<bool, GatewayError> {
        self.rooms.write().join(chat_id)
    }

    pub(crate) fn leave_room(&self, chat_id: &str) -> bool {
        self.rooms.write().leave(chat_id)
    }

    pub(crate) fn clear_rooms(&self) {
        self.rooms.write().clear();
    }
}

/// Metadata about a connection.
#[derive(Debug, Default, Clone)]
pub struct ConnectionMetadata {
    /// When the connection was accepted (Unix millis).
    pub connected_at: u64,
    /// Peer address.
    pub ip_address: Option<String>,
    /// User agent string.
    pub user_agent: Option<String>,
}

impl ConnectionMetadata {
    /// Create metadata with the current timestamp.
    pub fn now() -> Self {
        Self {
            connected_at: necho_types::now_millis(),
            ip_address: None,
            user_agent: None,
        }
    }
}

/// Handle for receiving frames the gateway queued for a connection.
pub type ConnectionReceiver = mpsc::UnboundedReceiver<String>;

/// Create a new connection with its frame receiver.
pub fn create_connection(
    id: ConnectionId,
    identity: Identity,
    metadata: ConnectionMetadata,
) -> (Arc<Connection>, ConnectionReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let connection = Arc::new(Connection::new(id, identity, sender, metadata));
    (connection, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            user_id: "u-alice".to_string(),
            username: "alice".to_string(),
        }
    }

    #[test]
    fn test_connection_creation() {
        let (conn, _rx) = create_connection("conn-1".to_string(), alice(), ConnectionMetadata::now());
        assert_eq!(conn.id, "conn-1");
        assert_eq!(conn.user_id(), "u-alice");
        assert_eq!(conn.room_count(), 0);
        assert!(conn.metadata.connected_at > 0);
    }

    #[test]
    fn test_connection_rooms() {
        let (conn, _rx) = create_connection("conn-1".to_string(), alice(), ConnectionMetadata::now());

        assert!(conn.join_room("c1".to_string()).unwrap());
        assert!(conn.in_room("c1"));
        assert!(!conn.in_room("c2"));
        assert_eq!(conn.joined_rooms(), vec!["c1".to_string()]);

        assert!(conn.leave_room("c1"));
        assert!(!conn.in_room("c1"));

        conn.join_room("c1".to_string()).unwrap();
        conn.join_room("c2".to_string()).unwrap();
        conn.clear_rooms();
        assert_eq!(conn.room_count(), 0);
    }

    #[test]
    fn test_connection_send_frame() {
        let (conn, mut rx) = create_connection("conn-1".to_string(), alice(), ConnectionMetadata::now());

        conn.send_frame(&ServerFrame::Pong).unwrap();

        let msg = rx.try_recv().unwrap();
        assert_eq!(msg, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (conn, rx) = create_connection("conn-1".to_string(), alice(), ConnectionMetadata::now());
        drop(rx);

        assert!(matches!(
            conn.send("late".to_string()),
            Err(GatewayError::ChannelClosed)
        ));
    }
}

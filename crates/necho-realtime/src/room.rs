//! Room membership for a single connection.

use crate::error::GatewayError;
use necho_types::ChatId;
use std::collections::HashSet;

/// Maximum rooms a single connection may join.
pub const MAX_ROOMS_PER_CONNECTION: usize = 100;

/// Name under which a chat's room shows up in logs.
pub fn room_name(chat_id: &str) -> String {
    format!("chat-{}", chat_id)
}

/// The set of chat rooms one connection has joined.
#[derive(Debug, Default)]
pub struct RoomSet {
    rooms: HashSet<ChatId>,
}

impl RoomSet {
    /// Create an empty room set.
    pub fn new() -> Self {
        Self {
            rooms: HashSet::new(),
        }
    }

    /// Join a room. Returns `false` if already joined.
    pub fn join(&mut self, chat_id: ChatId) -> Result<bool, GatewayError> {
        if self.rooms.contains(&chat_id) {
            return Ok(false);
        }
        if self.rooms.len() >= MAX_ROOMS_PER_CONNECTION {
            return Err(GatewayError::RoomLimit(MAX_ROOMS_PER_CONNECTION));
        }

        Ok(self.rooms.insert(chat_id))
    }

    /// Leave a room. Returns `false` if it was not joined.
    pub fn leave(&mut self, chat_id: &str) -> bool {
        self.rooms.remove(chat_id)
    }

    /// Check whether a room is joined.
    pub fn contains(&self, chat_id: &str) -> bool {
        self.rooms.contains(chat_id)
    }

    /// All joined rooms.
    pub fn rooms(&self) -> impl Iterator<Item = &ChatId> {
        self.rooms.iter()
    }

    /// Number of joined rooms.
    pub fn count(&self) -> usize {
        self.rooms.len()
    }

    /// Leave every room.
    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_name() {
        assert_eq!(room_name("c1"), "chat-c1");
    }

    #[test]
    fn test_join_and_leave() {
        let mut rooms = RoomSet::new();

        assert!(rooms.join("c1".into()).unwrap());
        assert!(rooms.contains("c1"));
        assert_eq!(rooms.count(), 1);

        // Duplicate join returns false
        assert!(!rooms.join("c1".into()).unwrap());
        assert_eq!(rooms.count(), 1);

        assert!(rooms.leave("c1"));
        assert!(!rooms.leave("c1"));
        assert!(!rooms.contains("c1"));
    }

    #[test]
    fn test_room_limit() {
        let mut rooms = RoomSet::new();

        for i in 0..MAX_ROOMS_PER_CONNECTION {
            rooms.join(format!("chat{}", i)).unwrap();
        }

        assert!(matches!(
            rooms.join("extra".into()),
            Err(GatewayError::RoomLimit(_))
        ));

        // Re-joining a room already held is still fine at the limit
        assert!(!rooms.join("chat0".into()).unwrap());
    }

    #[test]
    fn test_clear() {
        let mut rooms = RoomSet::new();
        rooms.join("c1".into()).unwrap();
        rooms.join("c2".into()).unwrap();

        rooms.clear();
        assert_eq!(rooms.count(), 0);
        assert_eq!(rooms.rooms().count(), 0);
    }
}

//! Locally tracked room membership with acknowledged join/leave.

use crate::bus::EventBus;
use crate::error::{ClientError, Result};
use crate::event::ClientEvent;
use crate::pending::PendingAcks;
use crate::session::ConnectionSession;
use necho_types::{ChatId, ClientCommand};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default wait for a join/leave ack.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// The chats this session has joined.
///
/// The set only changes when the server acknowledges a join or leave, so it
/// always equals the net effect of the calls that succeeded.
#[derive(Debug)]
pub struct RoomMembership {
    session: ConnectionSession,
    pending: Arc<PendingAcks>,
    bus: EventBus<ClientEvent>,
    joined: Mutex<BTreeSet<ChatId>>,
    timeout: Duration,
}

impl RoomMembership {
    /// Create an empty membership set.
    pub fn new(
        session: ConnectionSession,
        pending: Arc<PendingAcks>,
        bus: EventBus<ClientEvent>,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            pending,
            bus,
            joined: Mutex::new(BTreeSet::new()),
            timeout,
        }
    }

    /// Join a chat's room. A no-op when already joined.
    pub async fn join(&self, chat_id: &str) -> Result<()> {
        if self.is_joined(chat_id) {
            return Ok(());
        }
        self.remote_join(chat_id).await?;

        if self.joined.lock().insert(chat_id.to_string()) {
            info!(chat_id, "Joined chat");
            self.bus.emit(&ClientEvent::ChatJoined {
                chat_id: chat_id.to_string(),
            });
        }
        Ok(())
    }

    /// Leave a chat's room. A no-op when not joined.
    pub async fn leave(&self, chat_id: &str) -> Result<()> {
        if !self.is_joined(chat_id) {
            return Ok(());
        }
        let command = ClientCommand::LeaveChat {
            chat_id: chat_id.to_string(),
        };
        self.pending.call(&self.session, command, self.timeout).await?;

        if self.joined.lock().remove(chat_id) {
            info!(chat_id, "Left chat");
            self.bus.emit(&ClientEvent::ChatLeft {
                chat_id: chat_id.to_string(),
            });
        }
        Ok(())
    }

    /// Re-issue joins after the transport was replaced. Rooms the server now
    /// refuses are dropped locally; transient failures keep the room.
    pub async fn rejoin_all(&self) -> usize {
        let rooms = self.joined();
        let mut rejoined = 0;

        for chat_id in rooms {
            match self.remote_join(&chat_id).await {
                Ok(()) => rejoined += 1,
                Err(e @ ClientError::Rejected { .. }) => {
                    warn!(chat_id = %chat_id, error = %e, "Rejoin refused");
                    if self.joined.lock().remove(&chat_id) {
                        self.bus.emit(&ClientEvent::ChatLeft { chat_id });
                    }
                }
                Err(e) => warn!(chat_id = %chat_id, error = %e, "Rejoin failed"),
            }
        }
        rejoined
    }

    async fn remote_join(&self, chat_id: &str) -> Result<()> {
        let command = ClientCommand::JoinChat {
            chat_id: chat_id.to_string(),
        };
        self.pending.call(&self.session, command, self.timeout).await?;
        Ok(())
    }

    /// Whether the room is joined.
    pub fn is_joined(&self, chat_id: &str) -> bool {
        self.joined.lock().contains(chat_id)
    }

    /// Joined chats, sorted.
    pub fn joined(&self) -> Vec<ChatId> {
        self.joined.lock().iter().cloned().collect()
    }
}

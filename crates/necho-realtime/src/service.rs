//! Collaborators the gateway delegates to.
//!
//! The gateway never decides authorization or persistence itself: every
//! command goes through these traits, so swapping the in-memory store for a
//! relational one does not touch the broadcast logic.

use async_trait::async_trait;
use necho_types::{HistoryPage, Message, Result, SendMessage, UserId};
use serde::{Deserialize, Serialize};

/// The user a bearer credential resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User identifier.
    pub user_id: UserId,
    /// Display name used in typing and presence events.
    pub username: String,
}

/// Validates bearer credentials presented at connection time.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve a token to the user it was issued for.
    async fn verify(&self, token: &str) -> Result<Identity>;
}

/// Chat membership checks and message persistence.
#[async_trait]
pub trait DomainService: Send + Sync {
    /// Persist a new message from `sender`.
    async fn send_message(&self, sender: &str, payload: SendMessage) -> Result<Message>;

    /// Replace the content of a message owned by `editor`.
    async fn edit_message(&self, message_id: &str, content: String, editor: &str)
        -> Result<Message>;

    /// Remove a message owned by `requester`.
    async fn delete_message(&self, message_id: &str, requester: &str) -> Result<()>;

    /// Look up a message.
    async fn get_message(&self, message_id: &str) -> Result<Message>;

    /// Whether `user_id` participates in `chat_id`. Fails with `NotFound` for
    /// unknown chats.
    async fn chat_membership(&self, chat_id: &str, user_id: &str) -> Result<bool>;

    /// One page of a chat's history, newest first.
    async fn chat_messages(
        &self,
        chat_id: &str,
        user_id: &str,
        page: HistoryPage,
    ) -> Result<Vec<Message>>;
}

/// Persists online/offline status.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Record a user's presence.
    async fn set_online(&self, user_id: &str, online: bool) -> Result<()>;
}

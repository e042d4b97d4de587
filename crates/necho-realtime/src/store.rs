//! In-memory users, chats, messages and bearer tokens.

use crate::service::{DomainService, Identity, PresenceStore, TokenVerifier};
use async_trait::async_trait;
use necho_types::{
    now_millis, ChatId, DomainError, HistoryPage, Message, MessageId, Result, SendMessage, UserId,
};
use parking_lot::RwLock;
use rand::RngCore;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub online: bool,
    /// Unix millis of the last online/offline transition.
    pub last_seen: Option<u64>,
}

/// A direct or group conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: HashSet<UserId>,
    pub created_at: u64,
    /// Bumped on every new message.
    pub updated_at: u64,
}

impl Chat {
    /// Whether a user participates in this chat.
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.contains(user_id)
    }
}

/// Thread-safe in-memory store backing the gateway collaborators.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Users by ID.
    users: RwLock<HashMap<UserId, User>>,

    /// Username to user ID mapping.
    username_index: RwLock<HashMap<String, UserId>>,

    /// Chats by ID.
    chats: RwLock<HashMap<ChatId, Chat>>,

    /// Messages by ID.
    messages: RwLock<HashMap<MessageId, Message>>,

    /// Chat index: chat ID -> message IDs in insertion order.
    chat_index: RwLock<HashMap<ChatId, Vec<MessageId>>>,

    /// Bearer token -> user ID.
    tokens: RwLock<HashMap<String, UserId>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Users ====================

    /// Register a user.
    pub fn create_user(&self, username: impl Into<String>) -> Result<User> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(DomainError::Validation("username cannot be empty".into()));
        }
        if self.username_index.read().contains_key(&username) {
            return Err(DomainError::Validation(format!(
                "username '{}' is taken",
                username
            )));
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.clone(),
            online: false,
            last_seen: None,
        };

        self.users.write().insert(user.id.clone(), user.clone());
        self.username_index.write().insert(username, user.id.clone());

        Ok(user)
    }

    /// Get a user by ID.
    pub fn get_user(&self, id: &str) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    /// Get a user by username.
    pub fn get_user_by_username(&self, username: &str) -> Option<User> {
        let id = self.username_index.read().get(username).cloned()?;
        self.get_user(&id)
    }

    // ==================== Chats ====================

    /// Create a chat between existing users.
    pub fn create_chat(
        &self,
        name: Option<String>,
        participants: impl IntoIterator<Item = UserId>,
    ) -> Result<Chat> {
        let participants: HashSet<UserId> = participants.into_iter().collect();
        if participants.is_empty() {
            return Err(DomainError::Validation(
                "a chat needs at least one participant".into(),
            ));
        }
        {
            let users = self.users.read();
            if let Some(missing) = participants.iter().find(|id| !users.contains_key(*id)) {
                return Err(DomainError::NotFound(format!("user {}", missing)));
            }
        }

        let now = now_millis();
        let chat = Chat {
            id: Uuid::new_v4().to_string(),
            name,
            is_group: participants.len() > 2,
            participants,
            created_at: now,
            updated_at: now,
        };

        self.chats.write().insert(chat.id.clone(), chat.clone());
        self.chat_index.write().insert(chat.id.clone(), Vec::new());

        Ok(chat)
    }

    /// Get a chat by ID.
    pub fn get_chat(&self, id: &str) -> Option<Chat> {
        self.chats.read().get(id).cloned()
    }

    /// List chats a user participates in, most recently active first.
    pub fn list_user_chats(&self, user_id: &str) -> Vec<Chat> {
        let mut chats: Vec<Chat> = self
            .chats
            .read()
            .values()
            .filter(|chat| chat.is_participant(user_id))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        chats
    }

    // ==================== Tokens ====================

    /// Mint a random bearer token for a user.
    pub fn issue_token(&self, user_id: &str) -> Result<String> {
        if !self.users.read().contains_key(user_id) {
            return Err(DomainError::NotFound(format!("user {}", user_id)));
        }

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        self.tokens.write().insert(token.clone(), user_id.to_string());
        Ok(token)
    }

    /// Invalidate a token. Returns `false` if it was unknown.
    pub fn revoke_token(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    // ==================== Internal ====================

    fn require_chat(&self, chat_id: &str) -> Result<Chat> {
        self.get_chat(chat_id)
            .ok_or_else(|| DomainError::NotFound(format!("chat {}", chat_id)))
    }

    fn require_participant(&self, chat_id: &str, user_id: &str) -> Result<Chat> {
        let chat = self.require_chat(chat_id)?;
        if !chat.is_participant(user_id) {
            return Err(DomainError::PermissionDenied(format!(
                "user {} is not a participant of chat {}",
                user_id, chat_id
            )));
        }
        Ok(chat)
    }
}

#[async_trait]
impl TokenVerifier for MemoryStore {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let user_id = self
            .tokens
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| DomainError::Unauthorized("invalid token".into()))?;
        let user = self
            .get_user(&user_id)
            .ok_or_else(|| DomainError::Unauthorized("token owner no longer exists".into()))?;

        Ok(Identity {
            user_id: user.id,
            username: user.username,
        })
    }
}

#[async_trait]
impl DomainService for MemoryStore {
    async fn send_message(&self, sender: &str, payload: SendMessage) -> Result<Message> {
        self.require_participant(&payload.chat_id, sender)?;

        if let Some(reply_to) = &payload.reply_to_id {
            let same_chat = self
                .messages
                .read()
                .get(reply_to)
                .is_some_and(|m| m.chat_id == payload.chat_id);
            if !same_chat {
                return Err(DomainError::NotFound(format!(
                    "reply target {} in chat {}",
                    reply_to, payload.chat_id
                )));
            }
        }

        let now = now_millis();
        let message = Message {
            id: Uuid::new_v4().to_string(),
            chat_id: payload.chat_id,
            sender_id: sender.to_string(),
            content: payload.content,
            kind: payload.kind,
            file_name: payload.file_name,
            file_url: payload.file_url,
            edited: false,
            edited_at: None,
            reply_to_id: payload.reply_to_id,
            client_ref: payload.client_ref,
            created_at: now,
        };

        self.messages
            .write()
            .insert(message.id.clone(), message.clone());
        self.chat_index
            .write()
            .entry(message.chat_id.clone())
            .or_default()
            .push(message.id.clone());
        if let Some(chat) = self.chats.write().get_mut(&message.chat_id) {
            chat.updated_at = now;
        }

        Ok(message)
    }

    async fn edit_message(
        &self,
        message_id: &str,
        content: String,
        editor: &str,
    ) -> Result<Message> {
        let mut messages = self.messages.write();
        let message = messages
            .get_mut(message_id)
            .ok_or_else(|| DomainError::NotFound(format!("message {}", message_id)))?;

        if message.sender_id != editor {
            return Err(DomainError::PermissionDenied(
                "only the author can edit a message".into(),
            ));
        }

        message.content = content;
        message.edited = true;
        message.edited_at = Some(now_millis());

        Ok(message.clone())
    }

    async fn delete_message(&self, message_id: &str, requester: &str) -> Result<()> {
        let chat_id = {
            let mut messages = self.messages.write();
            let message = messages
                .get(message_id)
                .ok_or_else(|| DomainError::NotFound(format!("message {}", message_id)))?;

            if message.sender_id != requester {
                return Err(DomainError::PermissionDenied(
                    "only the author can delete a message".into(),
                ));
            }

            let chat_id = message.chat_id.clone();
            messages.remove(message_id);
            chat_id
        };

        if let Some(ids) = self.chat_index.write().get_mut(&chat_id) {
            ids.retain(|id| id != message_id);
        }

        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<Message> {
        self.messages
            .read()
            .get(message_id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("message {}", message_id)))
    }

    async fn chat_membership(&self, chat_id: &str, user_id: &str) -> Result<bool> {
        Ok(self.require_chat(chat_id)?.is_participant(user_id))
    }

    async fn chat_messages(
        &self,
        chat_id: &str,
        user_id: &str,
        page: HistoryPage,
    ) -> Result<Vec<Message>> {
        self.require_participant(chat_id, user_id)?;
        let page = page.normalized();

        let index = self.chat_index.read();
        let messages = self.messages.read();
        let ids = index.get(chat_id).map(Vec::as_slice).unwrap_or_default();

        Ok(ids
            .iter()
            .rev()
            .skip(page.offset())
            .take(page.limit as usize)
            .filter_map(|id| messages.get(id).cloned())
            .collect())
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn set_online(&self, user_id: &str, online: bool) -> Result<()> {
        let mut users = self.users.write();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| DomainError::NotFound(format!("user {}", user_id)))?;

        user.online = online;
        user.last_seen = Some(now_millis());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (MemoryStore, User, User, Chat) {
        let store = MemoryStore::new();
        let alice = store.create_user("alice").unwrap();
        let bob = store.create_user("bob").unwrap();
        let chat = store
            .create_chat(None, [alice.id.clone(), bob.id.clone()])
            .unwrap();
        (store, alice, bob, chat)
    }

    #[test]
    fn test_user_crud() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice").unwrap();

        assert_eq!(store.get_user(&alice.id), Some(alice.clone()));
        assert_eq!(store.get_user_by_username("alice"), Some(alice));
        assert!(store.create_user("alice").is_err());
        assert!(store.create_user("  ").is_err());
    }

    #[test]
    fn test_chat_requires_known_users() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice").unwrap();

        assert!(matches!(
            store.create_chat(None, [alice.id.clone(), "ghost".to_string()]),
            Err(DomainError::NotFound(_))
        ));

        let chat = store.create_chat(Some("solo".into()), [alice.id.clone()]).unwrap();
        assert!(!chat.is_group);
        assert_eq!(store.list_user_chats(&alice.id).len(), 1);
    }

    #[tokio::test]
    async fn test_token_verification() {
        let (store, alice, _, _) = setup();
        let token = store.issue_token(&alice.id).unwrap();
        assert_eq!(token.len(), 64);

        let identity = store.verify(&token).await.unwrap();
        assert_eq!(identity.user_id, alice.id);
        assert_eq!(identity.username, "alice");

        assert!(store.revoke_token(&token));
        assert!(matches!(
            store.verify(&token).await,
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_send_requires_participant() {
        let (store, alice, _, chat) = setup();
        let mallory = store.create_user("mallory").unwrap();

        let message = store
            .send_message(&alice.id, SendMessage::text(&chat.id, "hi").with_client_ref("r1"))
            .await
            .unwrap();
        assert_eq!(message.sender_id, alice.id);
        assert_eq!(message.client_ref.as_deref(), Some("r1"));
        assert!(store.get_chat(&chat.id).unwrap().updated_at >= message.created_at);

        assert!(matches!(
            store
                .send_message(&mallory.id, SendMessage::text(&chat.id, "hey"))
                .await,
            Err(DomainError::PermissionDenied(_))
        ));
        assert!(matches!(
            store
                .send_message(&alice.id, SendMessage::text("nope", "hey"))
                .await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reply_must_stay_in_chat() {
        let (store, alice, bob, chat) = setup();
        let other = store.create_chat(None, [alice.id.clone()]).unwrap();
        let elsewhere = store
            .send_message(&alice.id, SendMessage::text(&other.id, "elsewhere"))
            .await
            .unwrap();
        let original = store
            .send_message(&alice.id, SendMessage::text(&chat.id, "question"))
            .await
            .unwrap();

        let reply = store
            .send_message(
                &bob.id,
                SendMessage::text(&chat.id, "answer").replying_to(&original.id),
            )
            .await
            .unwrap();
        assert_eq!(reply.reply_to_id.as_deref(), Some(original.id.as_str()));

        assert!(matches!(
            store
                .send_message(
                    &bob.id,
                    SendMessage::text(&chat.id, "answer").replying_to(&elsewhere.id),
                )
                .await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_only_author_edits_and_deletes() {
        let (store, alice, bob, chat) = setup();
        let message = store
            .send_message(&alice.id, SendMessage::text(&chat.id, "typo"))
            .await
            .unwrap();

        assert!(matches!(
            store.edit_message(&message.id, "hijack".into(), &bob.id).await,
            Err(DomainError::PermissionDenied(_))
        ));
        let edited = store
            .edit_message(&message.id, "fixed".into(), &alice.id)
            .await
            .unwrap();
        assert!(edited.edited);
        assert!(edited.edited_at.is_some());
        assert_eq!(edited.content, "fixed");

        assert!(matches!(
            store.delete_message(&message.id, &bob.id).await,
            Err(DomainError::PermissionDenied(_))
        ));
        store.delete_message(&message.id, &alice.id).await.unwrap();
        assert!(matches!(
            store.get_message(&message.id).await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let (store, alice, bob, chat) = setup();
        for i in 0..5 {
            store
                .send_message(&alice.id, SendMessage::text(&chat.id, format!("m{}", i)))
                .await
                .unwrap();
        }

        let first = store
            .chat_messages(&chat.id, &bob.id, HistoryPage::new(1, 2))
            .await
            .unwrap();
        let contents: Vec<_> = first.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3"]);

        let last = store
            .chat_messages(&chat.id, &bob.id, HistoryPage::new(3, 2))
            .await
            .unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].content, "m0");

        let outsider = store.create_user("eve").unwrap();
        assert!(store
            .chat_messages(&chat.id, &outsider.id, HistoryPage::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_membership_and_presence() {
        let (store, alice, _, chat) = setup();
        let eve = store.create_user("eve").unwrap();

        assert!(store.chat_membership(&chat.id, &alice.id).await.unwrap());
        assert!(!store.chat_membership(&chat.id, &eve.id).await.unwrap());
        assert!(matches!(
            store.chat_membership("missing", &alice.id).await,
            Err(DomainError::NotFound(_))
        ));

        store.set_online(&alice.id, true).await.unwrap();
        let user = store.get_user(&alice.id).unwrap();
        assert!(user.online);
        assert!(user.last_seen.is_some());
        store.set_online(&alice.id, false).await.unwrap();
        assert!(!store.get_user(&alice.id).unwrap().online);
    }
}

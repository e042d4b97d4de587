//! Authenticated room broadcaster.
//!
//! The gateway owns the two registries of the real-time core: which
//! connection each user was last seen on, and (through each [`Connection`])
//! which chat rooms a connection has joined. Both are mutated only from
//! [`BroadcastGateway::connect`], [`BroadcastGateway::disconnect`] and the
//! command handlers.

use crate::connection::{create_connection, Connection, ConnectionId, ConnectionMetadata, ConnectionReceiver};
use crate::error::GatewayError;
use crate::room::room_name;
use crate::service::{DomainService, Identity, PresenceStore, TokenVerifier};
use crate::store::MemoryStore;
use necho_types::{
    Ack, ClientCommand, ClientFrame, DomainError, ErrorKind, Message, PushEvent, ServerFrame,
    UserId,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default maximum number of concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Gateway resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Maximum number of concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// What a successfully handled command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Success without payload.
    Done,
    /// Success carrying the authoritative message.
    Message(Message),
    /// Heartbeat answer.
    Pong,
    /// Nothing goes back to the sender.
    NoReply,
}

/// Gateway statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GatewayStats {
    /// Current number of connections.
    pub current_connections: usize,
    /// Users holding at least one connection.
    pub online_users: usize,
    /// Total connections since start.
    pub total_connections: u64,
    /// Total successful room joins since start.
    pub total_joins: u64,
    /// Total events fanned out since start.
    pub total_broadcasts: u64,
}

/// Server-side real-time core: authentication, presence, rooms and broadcast.
pub struct BroadcastGateway {
    /// Live connections indexed by ID.
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    /// User -> most recent connection, for point-to-point delivery.
    /// Lock order: `presence` before `connections`.
    presence: RwLock<HashMap<UserId, ConnectionId>>,
    /// Held from a registry change until its presence write is persisted,
    /// so persisted online flags land in registry order.
    presence_writes: tokio::sync::Mutex<()>,
    domain: Arc<dyn DomainService>,
    presence_store: Arc<dyn PresenceStore>,
    verifier: Arc<dyn TokenVerifier>,
    config: GatewayConfig,
    stats: RwLock<GatewayStats>,
}

impl std::fmt::Debug for BroadcastGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastGateway")
            .field("connections", &self.connection_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BroadcastGateway {
    /// Create a gateway over explicit collaborators.
    pub fn new(
        domain: Arc<dyn DomainService>,
        presence_store: Arc<dyn PresenceStore>,
        verifier: Arc<dyn TokenVerifier>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            presence: RwLock::new(HashMap::new()),
            presence_writes: tokio::sync::Mutex::new(()),
            domain,
            presence_store,
            verifier,
            config,
            stats: RwLock::new(GatewayStats::default()),
        }
    }

    /// Create a gateway whose collaborators are all backed by one store.
    pub fn with_store(store: Arc<MemoryStore>, config: GatewayConfig) -> Self {
        Self::new(store.clone(), store.clone(), store, config)
    }

    // ==================== Lifecycle ====================

    /// Resolve the bearer credential presented at connection time.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Identity, GatewayError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::Auth("missing bearer token".to_string()))?;

        self.verifier.verify(token).await.map_err(|e| match e {
            DomainError::Unauthorized(reason) => GatewayError::Auth(reason),
            other => GatewayError::Auth(other.to_string()),
        })
    }

    /// Register an authenticated connection and announce the user online.
    pub async fn connect(
        &self,
        identity: Identity,
        metadata: ConnectionMetadata,
    ) -> Result<(Arc<Connection>, ConnectionReceiver), GatewayError> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        let (connection, receiver) = create_connection(connection_id.clone(), identity, metadata);

        let writes = self.presence_writes.lock().await;
        {
            let mut presence = self.presence.write();
            let mut connections = self.connections.write();
            if connections.len() >= self.config.max_connections {
                return Err(GatewayError::ConnectionLimit(self.config.max_connections));
            }
            connections.insert(connection_id.clone(), connection.clone());
            presence.insert(connection.user_id().to_string(), connection_id.clone());
        }
        self.stats.write().total_connections += 1;

        info!(
            connection_id = %connection_id,
            user_id = %connection.user_id(),
            "Connection registered"
        );

        if let Err(e) = self.presence_store.set_online(connection.user_id(), true).await {
            warn!(user_id = %connection.user_id(), error = %e, "Failed to persist online status");
        }
        drop(writes);

        let online = PushEvent::UserOnline {
            user_id: connection.identity.user_id.clone(),
            username: connection.identity.username.clone(),
        };
        self.fan_out(&online, |c| c.id != connection_id);

        Ok((connection, receiver))
    }

    /// Authenticate a credential and register the connection in one step.
    pub async fn open(
        &self,
        token: Option<&str>,
        metadata: ConnectionMetadata,
    ) -> Result<(Arc<Connection>, ConnectionReceiver), GatewayError> {
        let identity = self.authenticate(token).await?;
        self.connect(identity, metadata).await
    }

    /// Remove a connection. The user goes offline once their last
    /// connection is gone.
    pub async fn disconnect(&self, connection_id: &str) {
        let writes = self.presence_writes.lock().await;
        let (connection, still_connected) = {
            let mut presence = self.presence.write();
            let mut connections = self.connections.write();
            let Some(connection) = connections.remove(connection_id) else {
                return;
            };
            let user_id = connection.user_id();
            let remaining = connections
                .values()
                .filter(|c| c.user_id() == user_id)
                .max_by_key(|c| c.metadata.connected_at)
                .map(|c| c.id.clone());

            let still_connected = match remaining {
                Some(other) => {
                    if presence.get(user_id).map(String::as_str) == Some(connection_id) {
                        presence.insert(user_id.to_string(), other);
                    }
                    true
                }
                None => {
                    presence.remove(user_id);
                    false
                }
            };
            (connection, still_connected)
        };
        connection.clear_rooms();
        let user_id = connection.user_id().to_string();

        info!(
            connection_id = %connection_id,
            user_id = %user_id,
            still_connected,
            "Connection closed"
        );

        if still_connected {
            return;
        }

        if let Err(e) = self.presence_store.set_online(&user_id, false).await {
            warn!(user_id = %user_id, error = %e, "Failed to persist offline status");
        }
        drop(writes);
        self.fan_out(&PushEvent::UserOffline { user_id }, |_| true);
    }

    // ==================== Commands ====================

    /// Handle one raw text frame from a connection, replying on its channel.
    pub async fn handle_text(&self, connection: &Arc<Connection>, text: &str) {
        match serde_json::from_str::<ClientFrame>(text) {
            Ok(frame) => self.handle_frame(connection, frame).await,
            Err(e) => {
                warn!(connection_id = %connection.id, error = %e, "Malformed frame");
                if let Some(id) = ClientFrame::recover_id(text) {
                    let ack = Ack::failed(id, ErrorKind::Validation, e.to_string());
                    self.reply(connection, &ServerFrame::Ack(ack));
                }
            }
        }
    }

    /// Handle a parsed frame, replying with an ack or pong as appropriate.
    pub async fn handle_frame(&self, connection: &Arc<Connection>, frame: ClientFrame) {
        let name = frame.command.name();
        let result = self.handle_command(connection, frame.command).await;

        let reply = match (result, frame.id) {
            (Ok(CommandOutcome::Pong), _) => Some(ServerFrame::Pong),
            (Ok(CommandOutcome::NoReply), _) => None,
            (Ok(CommandOutcome::Done), Some(id)) => Some(ServerFrame::Ack(Ack::ok(id))),
            (Ok(CommandOutcome::Message(message)), Some(id)) => {
                Some(ServerFrame::Ack(Ack::with_message(id, message)))
            }
            (Ok(_), None) => None,
            (Err(e), id) => {
                debug!(
                    connection_id = %connection.id,
                    command = name,
                    error = %e,
                    "Command rejected"
                );
                id.map(|id| ServerFrame::Ack(Ack::failed(id, e.kind(), e.to_string())))
            }
        };

        if let Some(reply) = reply {
            self.reply(connection, &reply);
        }
    }

    /// Validate, authorize and apply one command on behalf of a connection.
    pub async fn handle_command(
        &self,
        connection: &Arc<Connection>,
        command: ClientCommand,
    ) -> Result<CommandOutcome, GatewayError> {
        command.validate_shape()?;
        let user_id = connection.user_id();

        match command {
            ClientCommand::JoinChat { chat_id } => {
                if connection.in_room(&chat_id) {
                    return Ok(CommandOutcome::Done);
                }
                if !self.domain.chat_membership(&chat_id, user_id).await? {
                    return Err(DomainError::PermissionDenied(format!(
                        "not a participant of chat {}",
                        chat_id
                    ))
                    .into());
                }

                let room = room_name(&chat_id);
                if connection.join_room(chat_id)? {
                    self.stats.write().total_joins += 1;
                    debug!(connection_id = %connection.id, room = %room, "Joined room");
                }
                Ok(CommandOutcome::Done)
            }
            ClientCommand::LeaveChat { chat_id } => {
                if connection.leave_room(&chat_id) {
                    debug!(connection_id = %connection.id, room = %room_name(&chat_id), "Left room");
                }
                Ok(CommandOutcome::Done)
            }
            ClientCommand::SendMessage(payload) => {
                let message = self.domain.send_message(user_id, payload).await?;
                self.broadcast_to_chat(&message.chat_id, &PushEvent::NewMessage(message.clone()));
                Ok(CommandOutcome::Message(message))
            }
            ClientCommand::EditMessage(payload) => {
                let message = self
                    .domain
                    .edit_message(&payload.message_id, payload.content, user_id)
                    .await?;
                self.broadcast_to_chat(
                    &message.chat_id,
                    &PushEvent::MessageEdited(message.clone()),
                );
                Ok(CommandOutcome::Message(message))
            }
            ClientCommand::DeleteMessage { message_id } => {
                let chat_id = self.domain.get_message(&message_id).await?.chat_id;
                self.domain.delete_message(&message_id, user_id).await?;
                let event = PushEvent::MessageDeleted {
                    message_id,
                    chat_id: chat_id.clone(),
                };
                self.broadcast_to_chat(&chat_id, &event);
                Ok(CommandOutcome::Done)
            }
            ClientCommand::TypingStart { chat_id } => {
                let event = PushEvent::UserTyping {
                    user_id: user_id.to_string(),
                    username: connection.identity.username.clone(),
                    chat_id: chat_id.clone(),
                };
                self.relay_typing(connection, &chat_id, &event);
                Ok(CommandOutcome::NoReply)
            }
            ClientCommand::TypingStop { chat_id } => {
                let event = PushEvent::UserStoppedTyping {
                    user_id: user_id.to_string(),
                    chat_id: chat_id.clone(),
                };
                self.relay_typing(connection, &chat_id, &event);
                Ok(CommandOutcome::NoReply)
            }
            ClientCommand::Ping => Ok(CommandOutcome::Pong),
        }
    }

    fn relay_typing(&self, connection: &Arc<Connection>, chat_id: &str, event: &PushEvent) {
        if !connection.in_room(chat_id) {
            debug!(
                connection_id = %connection.id,
                room = %room_name(chat_id),
                "Dropping typing signal from outside the room"
            );
            return;
        }
        let sender = connection.user_id();
        self.fan_out(event, |c| c.user_id() != sender && c.in_room(chat_id));
    }

    // ==================== Delivery ====================

    /// Send an event to every connection that joined a chat's room.
    pub fn broadcast_to_chat(&self, chat_id: &str, event: &PushEvent) -> usize {
        self.fan_out(event, |c| c.in_room(chat_id))
    }

    /// Send an event to the connection a user was most recently seen on.
    pub fn send_to_user(&self, user_id: &str, event: &PushEvent) -> bool {
        let Some(connection_id) = self.presence.read().get(user_id).cloned() else {
            return false;
        };
        let Some(connection) = self.get_connection(&connection_id) else {
            return false;
        };
        connection
            .send_frame(&ServerFrame::Event(event.clone()))
            .is_ok()
    }

    fn fan_out(&self, event: &PushEvent, filter: impl Fn(&Connection) -> bool) -> usize {
        let json = match serde_json::to_string(&ServerFrame::Event(event.clone())) {
            Ok(json) => json,
            Err(e) => {
                warn!(event = event.name(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut recipients = 0;
        let connections = self.connections.read();
        for connection in connections.values() {
            if filter(connection) && connection.send(json.clone()).is_ok() {
                recipients += 1;
            }
        }
        drop(connections);

        self.stats.write().total_broadcasts += 1;

        debug!(
            event = event.name(),
            chat_id = event.chat_id().unwrap_or("-"),
            recipients,
            "Event broadcast"
        );
        recipients
    }

    fn reply(&self, connection: &Connection, frame: &ServerFrame) {
        if let Err(e) = connection.send_frame(frame) {
            debug!(connection_id = %connection.id, error = %e, "Reply dropped");
        }
    }

    // ==================== Introspection ====================

    /// Get a connection by ID.
    pub fn get_connection(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(connection_id).cloned()
    }

    /// Get current connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether a user holds at least one connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.read().contains_key(user_id)
    }

    /// Get gateway statistics.
    pub fn stats(&self) -> GatewayStats {
        let mut stats = self.stats.read().clone();
        stats.current_connections = self.connection_count();
        stats.online_users = self.presence.read().len();
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use necho_types::SendMessage;

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: BroadcastGateway,
        alice: String,
        bob: String,
        eve: String,
        chat: String,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let alice = store.create_user("alice").unwrap().id;
        let bob = store.create_user("bob").unwrap().id;
        let eve = store.create_user("eve").unwrap().id;
        let chat = store
            .create_chat(None, [alice.clone(), bob.clone()])
            .unwrap()
            .id;
        let gateway = BroadcastGateway::with_store(store.clone(), GatewayConfig::default());
        Fixture {
            store,
            gateway,
            alice,
            bob,
            eve,
            chat,
        }
    }

    impl Fixture {
        async fn open(&self, user_id: &str) -> (Arc<Connection>, ConnectionReceiver) {
            let token = self.store.issue_token(user_id).unwrap();
            self.gateway
                .open(Some(&token), ConnectionMetadata::now())
                .await
                .unwrap()
        }
    }

    fn drain(rx: &mut ConnectionReceiver) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    fn events(rx: &mut ConnectionReceiver) -> Vec<PushEvent> {
        drain(rx)
            .into_iter()
            .filter_map(|f| match f {
                ServerFrame::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    fn join(chat_id: &str) -> ClientCommand {
        ClientCommand::JoinChat {
            chat_id: chat_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_requires_valid_token() {
        let fx = fixture();

        let missing = fx.gateway.open(None, ConnectionMetadata::now()).await;
        assert!(matches!(missing, Err(GatewayError::Auth(_))));

        let blank = fx.gateway.open(Some("  "), ConnectionMetadata::now()).await;
        assert!(matches!(blank, Err(GatewayError::Auth(_))));

        let bogus = fx.gateway.open(Some("deadbeef"), ConnectionMetadata::now()).await;
        assert!(matches!(bogus, Err(GatewayError::Auth(_))));

        assert_eq!(fx.gateway.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_announces_presence() {
        let fx = fixture();
        let (_bob, mut bob_rx) = fx.open(&fx.bob).await;
        let (_alice, mut alice_rx) = fx.open(&fx.alice).await;

        assert_eq!(
            events(&mut bob_rx),
            vec![PushEvent::UserOnline {
                user_id: fx.alice.clone(),
                username: "alice".to_string(),
            }]
        );
        // No self-announcement
        assert!(events(&mut alice_rx).is_empty());
        assert!(fx.gateway.is_online(&fx.alice));
        assert!(fx.store.get_user(&fx.alice).unwrap().online);
    }

    #[tokio::test]
    async fn test_join_requires_participation() {
        let fx = fixture();
        let (eve, _rx) = fx.open(&fx.eve).await;

        let denied = fx.gateway.handle_command(&eve, join(&fx.chat)).await;
        assert_eq!(denied.unwrap_err().kind(), ErrorKind::PermissionDenied);
        assert!(!eve.in_room(&fx.chat));

        let missing = fx.gateway.handle_command(&eve, join("no-such-chat")).await;
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_broadcast_is_room_scoped() {
        let fx = fixture();
        let (alice, mut alice_rx) = fx.open(&fx.alice).await;
        let (bob, mut bob_rx) = fx.open(&fx.bob).await;
        fx.gateway.handle_command(&alice, join(&fx.chat)).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        // Bob participates but has not joined the room
        let outcome = fx
            .gateway
            .handle_command(
                &alice,
                ClientCommand::SendMessage(SendMessage::text(&fx.chat, "first")),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::Message(_)));
        assert!(events(&mut bob_rx).is_empty());
        assert_eq!(events(&mut alice_rx).len(), 1);

        fx.gateway.handle_command(&bob, join(&fx.chat)).await.unwrap();
        fx.gateway
            .handle_command(
                &alice,
                ClientCommand::SendMessage(SendMessage::text(&fx.chat, "second")),
            )
            .await
            .unwrap();

        match events(&mut bob_rx).as_slice() {
            [PushEvent::NewMessage(message)] => assert_eq!(message.content, "second"),
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ack_frames() {
        let fx = fixture();
        let (alice, mut rx) = fx.open(&fx.alice).await;

        fx.gateway
            .handle_frame(&alice, ClientFrame::request(1, join(&fx.chat)))
            .await;
        fx.gateway
            .handle_frame(
                &alice,
                ClientFrame::request(
                    2,
                    ClientCommand::SendMessage(SendMessage::text(&fx.chat, "hi").with_client_ref("r1")),
                ),
            )
            .await;
        fx.gateway
            .handle_frame(&alice, ClientFrame::notify(ClientCommand::Ping))
            .await;

        let frames = drain(&mut rx);
        assert_eq!(frames[0], ServerFrame::Ack(Ack::ok(1)));
        // The broadcast reaches the sender's own connection before its ack
        assert!(matches!(&frames[1], ServerFrame::Event(PushEvent::NewMessage(_))));
        match &frames[2] {
            ServerFrame::Ack(ack) => {
                assert_eq!(ack.id, 2);
                assert!(ack.success);
                let message = ack.message.as_ref().unwrap();
                assert_eq!(message.client_ref.as_deref(), Some("r1"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(frames[3], ServerFrame::Pong);
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_validation_ack() {
        let fx = fixture();
        let (alice, mut rx) = fx.open(&fx.alice).await;

        fx.gateway
            .handle_text(&alice, r#"{"command":"explode","id":9}"#)
            .await;
        fx.gateway.handle_text(&alice, "garbage").await;
        fx.gateway
            .handle_text(
                &alice,
                r#"{"command":"send-message","id":10,"chatId":"c","content":"   "}"#,
            )
            .await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        for (frame, id) in frames.iter().zip([9, 10]) {
            match frame {
                ServerFrame::Ack(ack) => {
                    assert_eq!(ack.id, id);
                    assert_eq!(ack.error.as_ref().unwrap().kind, ErrorKind::Validation);
                }
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_edit_and_delete_broadcast() {
        let fx = fixture();
        let (alice, _alice_rx) = fx.open(&fx.alice).await;
        let (bob, mut bob_rx) = fx.open(&fx.bob).await;
        fx.gateway.handle_command(&bob, join(&fx.chat)).await.unwrap();

        let CommandOutcome::Message(message) = fx
            .gateway
            .handle_command(
                &alice,
                ClientCommand::SendMessage(SendMessage::text(&fx.chat, "typo")),
            )
            .await
            .unwrap()
        else {
            panic!("expected a message");
        };

        let denied = fx
            .gateway
            .handle_command(
                &bob,
                ClientCommand::DeleteMessage {
                    message_id: message.id.clone(),
                },
            )
            .await;
        assert_eq!(denied.unwrap_err().kind(), ErrorKind::PermissionDenied);

        fx.gateway
            .handle_command(
                &alice,
                ClientCommand::EditMessage(necho_types::EditMessage {
                    message_id: message.id.clone(),
                    content: "fixed".into(),
                }),
            )
            .await
            .unwrap();
        fx.gateway
            .handle_command(
                &alice,
                ClientCommand::DeleteMessage {
                    message_id: message.id.clone(),
                },
            )
            .await
            .unwrap();

        let names: Vec<_> = events(&mut bob_rx).iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["new-message", "message-edited", "message-deleted"]);
    }

    #[tokio::test]
    async fn test_typing_relay_excludes_sender() {
        let fx = fixture();
        let (alice_phone, mut phone_rx) = fx.open(&fx.alice).await;
        let (alice_laptop, mut laptop_rx) = fx.open(&fx.alice).await;
        let (bob, mut bob_rx) = fx.open(&fx.bob).await;

        let typing = ClientCommand::TypingStart {
            chat_id: fx.chat.clone(),
        };

        // Not in the room yet: dropped
        let outcome = fx
            .gateway
            .handle_command(&alice_phone, typing.clone())
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::NoReply);

        for conn in [&alice_phone, &alice_laptop, &bob] {
            fx.gateway.handle_command(conn, join(&fx.chat)).await.unwrap();
        }
        drain(&mut phone_rx);
        drain(&mut laptop_rx);
        drain(&mut bob_rx);

        fx.gateway
            .handle_command(&alice_phone, typing)
            .await
            .unwrap();

        assert!(events(&mut phone_rx).is_empty());
        assert!(events(&mut laptop_rx).is_empty());
        assert_eq!(
            events(&mut bob_rx),
            vec![PushEvent::UserTyping {
                user_id: fx.alice.clone(),
                username: "alice".into(),
                chat_id: fx.chat.clone(),
            }]
        );
    }

    #[tokio::test]
    async fn test_multi_device_presence() {
        let fx = fixture();
        let (_bob, mut bob_rx) = fx.open(&fx.bob).await;
        let (first, _rx1) = fx.open(&fx.alice).await;
        let (second, _rx2) = fx.open(&fx.alice).await;
        drain(&mut bob_rx);

        fx.gateway.disconnect(&second.id).await;
        assert!(fx.gateway.is_online(&fx.alice));
        assert!(events(&mut bob_rx).is_empty());

        // Point-to-point delivery falls back to the remaining connection
        let ping = PushEvent::UserOnline {
            user_id: fx.bob.clone(),
            username: "bob".into(),
        };
        assert!(fx.gateway.send_to_user(&fx.alice, &ping));

        fx.gateway.disconnect(&first.id).await;
        assert!(!fx.gateway.is_online(&fx.alice));
        assert!(!fx.store.get_user(&fx.alice).unwrap().online);
        assert_eq!(
            events(&mut bob_rx),
            vec![PushEvent::UserOffline {
                user_id: fx.alice.clone()
            }]
        );

        // Disconnecting twice is harmless
        fx.gateway.disconnect(&first.id).await;
    }

    /// Presence store whose offline writes wait until released.
    #[derive(Default)]
    struct GatedPresence {
        offline_started: tokio::sync::Notify,
        release: tokio::sync::Notify,
        writes: parking_lot::Mutex<Vec<(String, bool)>>,
    }

    #[async_trait::async_trait]
    impl PresenceStore for GatedPresence {
        async fn set_online(&self, user_id: &str, online: bool) -> necho_types::Result<()> {
            if !online {
                self.offline_started.notify_one();
                self.release.notified().await;
            }
            self.writes.lock().push((user_id.to_string(), online));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_reconnect_during_offline_write_stays_online() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.create_user("alice").unwrap().id;
        let presence = Arc::new(GatedPresence::default());
        let gateway = Arc::new(BroadcastGateway::new(
            store.clone(),
            presence.clone(),
            store.clone(),
            GatewayConfig::default(),
        ));
        let token = store.issue_token(&alice).unwrap();
        let (first, _rx1) = gateway
            .open(Some(&token), ConnectionMetadata::now())
            .await
            .unwrap();

        let gw = gateway.clone();
        let leaving = tokio::spawn(async move { gw.disconnect(&first.id).await });
        presence.offline_started.notified().await;

        // A new device arrives while the offline write is still in flight
        let gw = gateway.clone();
        let arriving = tokio::spawn(async move {
            gw.open(Some(&token), ConnectionMetadata::now()).await.unwrap()
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        presence.release.notify_one();

        leaving.await.unwrap();
        let (_second, _rx2) = arriving.await.unwrap();

        assert!(gateway.is_online(&alice));
        assert_eq!(
            presence.writes.lock().last(),
            Some(&(alice.clone(), true))
        );
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let store = Arc::new(MemoryStore::new());
        let alice = store.create_user("alice").unwrap();
        let gateway = BroadcastGateway::with_store(
            store.clone(),
            GatewayConfig { max_connections: 1 },
        );
        let identity = Identity {
            user_id: alice.id,
            username: alice.username,
        };

        let _first = gateway
            .connect(identity.clone(), ConnectionMetadata::now())
            .await
            .unwrap();
        assert!(matches!(
            gateway.connect(identity, ConnectionMetadata::now()).await,
            Err(GatewayError::ConnectionLimit(1))
        ));
    }

    #[tokio::test]
    async fn test_gateway_stats() {
        let fx = fixture();
        let (alice, _rx) = fx.open(&fx.alice).await;
        fx.gateway.handle_command(&alice, join(&fx.chat)).await.unwrap();
        // Rejoining is a no-op
        fx.gateway.handle_command(&alice, join(&fx.chat)).await.unwrap();

        let stats = fx.gateway.stats();
        assert_eq!(stats.current_connections, 1);
        assert_eq!(stats.online_users, 1);
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.total_joins, 1);
    }
}

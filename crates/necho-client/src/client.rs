//! The assembled client: one session, its rooms, commands, typing and timeline.

use crate::bus::{EventBus, Subscription};
use crate::dispatcher::{CommandDispatcher, DEFAULT_COMMAND_TIMEOUT};
use crate::error::{ClientError, Result};
use crate::event::{ClientEvent, EventKind};
use crate::history::{HistorySource, HttpHistory};
use crate::pending::PendingAcks;
use crate::reconciler::{OptimisticReconciler, TimelineEntry};
use crate::rooms::{RoomMembership, DEFAULT_JOIN_TIMEOUT};
use crate::session::{
    ConnectionSession, ConnectionState, ReconnectPolicy, SessionConfig,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE_DELAY,
};
use crate::transport::{Connector, WsConnector};
use crate::typing::TypingTracker;
use necho_types::{ChatId, HistoryPage, Message, MessageId, PushEvent, SendMessage, ServerFrame, UserId};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8080/ws`.
    pub url: String,
    /// Bearer credential presented when the transport opens.
    pub token: String,
    /// HTTP base for history pages; no history source when unset.
    pub history_url: Option<String>,
    pub heartbeat_interval: Duration,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub join_timeout: Duration,
    pub command_timeout: Duration,
}

impl ClientConfig {
    /// Settings with the default timings.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            history_url: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Fetch history from `base_url`.
    pub fn with_history_url(mut self, base_url: impl Into<String>) -> Self {
        self.history_url = Some(base_url.into());
        self
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            heartbeat_interval: self.heartbeat_interval,
            reconnect: ReconnectPolicy {
                base_delay: self.reconnect_base_delay,
                max_attempts: self.max_reconnect_attempts,
            },
        }
    }
}

/// State the router task shares with the client.
struct Shared {
    bus: EventBus<ClientEvent>,
    pending: Arc<PendingAcks>,
    rooms: Arc<RoomMembership>,
    typing: TypingTracker,
    reconciler: Arc<Mutex<OptimisticReconciler>>,
}

impl Shared {
    fn handle_frame(&self, frame: ServerFrame) {
        match frame {
            ServerFrame::Ack(ack) => {
                self.pending.resolve(ack);
            }
            ServerFrame::Event(event) => self.handle_event(event),
            ServerFrame::Pong => trace!("Pong"),
        }
    }

    fn handle_event(&self, event: PushEvent) {
        debug!(event = event.name(), "Push event");
        match event {
            PushEvent::UserTyping {
                user_id,
                username,
                chat_id,
            } => self.typing.on_remote_start(&chat_id, &user_id, &username),
            PushEvent::UserStoppedTyping { user_id, chat_id } => {
                self.typing.on_remote_stop(&chat_id, &user_id)
            }
            event => {
                {
                    let mut reconciler = self.reconciler.lock();
                    match &event {
                        PushEvent::NewMessage(m) => reconciler.apply_live_new(m.clone()),
                        PushEvent::MessageEdited(m) => reconciler.apply_live_edit(m.clone()),
                        PushEvent::MessageDeleted {
                            message_id,
                            chat_id,
                        } => reconciler.apply_live_delete(chat_id, message_id),
                        _ => {}
                    }
                }
                self.bus.emit(&ClientEvent::from(event));
            }
        }
    }

    /// Typing state follows the bus synchronously: the state watch coalesces
    /// transitions, so a disconnect followed at once by a connect would
    /// otherwise never be seen.
    fn watch_typing(&self) {
        let typing = self.typing.clone();
        self.bus.on(EventKind::ConnectionState, move |event| {
            if let ClientEvent::ConnectionState(ConnectionState::Disconnected | ConnectionState::Error) =
                event
            {
                typing.dispose_all();
            }
        });
        let typing = self.typing.clone();
        self.bus.on(EventKind::ChatLeft, move |event| {
            if let ClientEvent::ChatLeft { chat_id } = event {
                typing.dispose_chat(chat_id);
            }
        });
    }

    fn handle_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected if !self.rooms.joined().is_empty() => {
                // A new server connection starts with no rooms
                let rooms = self.rooms.clone();
                tokio::spawn(async move {
                    let rejoined = rooms.rejoin_all().await;
                    info!(rejoined, "Rejoined chats after reconnect");
                });
            }
            _ => {}
        }
    }
}

async fn route(
    shared: Arc<Shared>,
    mut frames: mpsc::UnboundedReceiver<ServerFrame>,
    mut states: watch::Receiver<ConnectionState>,
) {
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => shared.handle_frame(frame),
                None => break,
            },
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                shared.handle_state(state);
            }
        }
    }
    debug!("Client router stopped");
}

/// One optimistic send in flight. Dropped without a confirmation, it
/// discards the pending entry.
struct SendAttempt<'a> {
    reconciler: &'a Mutex<OptimisticReconciler>,
    temp_id: Option<String>,
}

impl SendAttempt<'_> {
    fn confirm(mut self, message: Message) {
        if let Some(temp_id) = self.temp_id.take() {
            self.reconciler.lock().confirm(&temp_id, message);
        }
    }
}

impl Drop for SendAttempt<'_> {
    fn drop(&mut self) {
        if let Some(temp_id) = self.temp_id.take() {
            debug!(temp_id = %temp_id, "Discarding unconfirmed message");
            self.reconciler.lock().fail(&temp_id);
        }
    }
}

/// A messenger client.
///
/// Must be created inside a tokio runtime: construction spawns the task that
/// routes acks and push events.
pub struct ChatClient {
    user_id: UserId,
    session: ConnectionSession,
    dispatcher: CommandDispatcher,
    history: Option<Arc<dyn HistorySource>>,
    shared: Arc<Shared>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("user_id", &self.user_id)
            .field("state", &self.session.state())
            .field("joined", &self.shared.rooms.joined())
            .finish_non_exhaustive()
    }
}

impl ChatClient {
    /// Create a client for `user_id` over an arbitrary connector.
    pub fn new(config: ClientConfig, user_id: impl Into<UserId>, connector: Arc<dyn Connector>) -> Self {
        let bus = EventBus::<ClientEvent>::new();
        let (session, frames) =
            ConnectionSession::new(config.session_config(), connector, bus.clone());
        let pending = Arc::new(PendingAcks::new());
        let dispatcher =
            CommandDispatcher::new(session.clone(), pending.clone(), config.command_timeout);
        let rooms = Arc::new(RoomMembership::new(
            session.clone(),
            pending.clone(),
            bus.clone(),
            config.join_timeout,
        ));
        let typing = TypingTracker::new(Arc::new(dispatcher.clone()), bus.clone());

        let shared = Arc::new(Shared {
            bus,
            pending,
            rooms,
            typing,
            reconciler: Arc::new(Mutex::new(OptimisticReconciler::new())),
        });
        shared.watch_typing();
        let router = tokio::spawn(route(shared.clone(), frames, session.state_changes()));

        Self {
            user_id: user_id.into(),
            session,
            dispatcher,
            history: None,
            shared,
            router: Mutex::new(Some(router)),
        }
    }

    /// Create a WebSocket client from its settings, with HTTP history when
    /// `history_url` is set.
    pub fn websocket(config: ClientConfig, user_id: impl Into<UserId>) -> Self {
        let connector = Arc::new(WsConnector::new(config.url.clone(), config.token.clone()));
        let history = config
            .history_url
            .clone()
            .map(|url| Arc::new(HttpHistory::new(url, config.token.clone())) as Arc<dyn HistorySource>);
        let client = Self::new(config, user_id, connector);
        match history {
            Some(history) => client.with_history(history),
            None => client,
        }
    }

    /// Use `history` for [`load_history`](Self::load_history).
    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = Some(history);
        self
    }

    /// The user this client acts as.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    // ==================== Connection ====================

    /// Open the connection.
    pub fn connect(&self) -> Result<()> {
        info!(user_id = %self.user_id, "Connecting");
        self.session.connect()
    }

    /// Leave `Error` with a fresh reconnect budget.
    pub fn reconnect(&self) -> Result<()> {
        self.session.reconnect()
    }

    /// Close the connection. Joined chats are rejoined on the next connect.
    pub fn disconnect(&self) {
        self.session.disconnect();
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.session.state_changes()
    }

    /// Subscribe to one kind of event.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.shared.bus.on(kind, listener)
    }

    /// The client's event bus.
    pub fn bus(&self) -> &EventBus<ClientEvent> {
        &self.shared.bus
    }

    // ==================== Rooms ====================

    /// Join a chat's room.
    pub async fn join_chat(&self, chat_id: &str) -> Result<()> {
        self.shared.rooms.join(chat_id).await
    }

    /// Leave a chat's room. Its typing state is dropped with it.
    pub async fn leave_chat(&self, chat_id: &str) -> Result<()> {
        self.shared.rooms.leave(chat_id).await
    }

    /// Joined chats, sorted.
    pub fn joined_chats(&self) -> Vec<ChatId> {
        self.shared.rooms.joined()
    }

    // ==================== Messages ====================

    /// Send a message and wait for the confirmed copy.
    pub async fn send_message(&self, payload: SendMessage) -> Result<Message> {
        self.shared.typing.stop_typing(&payload.chat_id);
        self.dispatcher.send_message(payload).await
    }

    /// Send a message, showing it in the timeline as pending until the server
    /// confirms it. A rejected or timed-out send is removed from the timeline
    /// and its error returned, as is a send whose future is dropped early.
    pub async fn send_message_optimistic(&self, payload: SendMessage) -> Result<Message> {
        self.shared.typing.stop_typing(&payload.chat_id);
        let (entry, payload) = self
            .shared
            .reconciler
            .lock()
            .add_optimistic(&self.user_id, payload);
        let attempt = SendAttempt {
            reconciler: &self.shared.reconciler,
            temp_id: Some(entry.temp_id.clone()),
        };

        match self.dispatcher.send_message(payload).await {
            Ok(message) => {
                attempt.confirm(message.clone());
                Ok(message)
            }
            Err(e) => {
                warn!(temp_id = %entry.temp_id, error = %e, "Send failed");
                Err(e)
            }
        }
    }

    /// Edit one of our messages.
    pub async fn edit_message(
        &self,
        message_id: impl Into<MessageId>,
        content: impl Into<String>,
    ) -> Result<Message> {
        let message = self.dispatcher.edit_message(message_id, content).await?;
        self.shared.reconciler.lock().apply_live_edit(message.clone());
        Ok(message)
    }

    /// Delete one of our messages.
    pub async fn delete_message(&self, chat_id: &str, message_id: impl Into<MessageId>) -> Result<()> {
        let message_id = message_id.into();
        self.dispatcher.delete_message(message_id.clone()).await?;
        self.shared
            .reconciler
            .lock()
            .apply_live_delete(chat_id, &message_id);
        Ok(())
    }

    /// Fetch a history page into the timeline and return it.
    pub async fn load_history(&self, chat_id: &str, page: HistoryPage) -> Result<Vec<Message>> {
        let history = self
            .history
            .as_ref()
            .ok_or_else(|| ClientError::Transport("no history source configured".to_string()))?;
        let messages = history.fetch_page(chat_id, page).await?;
        self.shared
            .reconciler
            .lock()
            .add_history_page(messages.iter().cloned());
        Ok(messages)
    }

    /// Merged timeline of a chat, oldest first.
    pub fn timeline(&self, chat_id: &str) -> Vec<TimelineEntry> {
        self.shared.reconciler.lock().merged(chat_id)
    }

    // ==================== Typing ====================

    /// The local user typed in a chat.
    pub fn start_typing(&self, chat_id: &str) {
        self.shared.typing.start_typing(chat_id);
    }

    /// The local user stopped typing.
    pub fn stop_typing(&self, chat_id: &str) {
        self.shared.typing.stop_typing(chat_id);
    }

    /// Users currently typing in a chat.
    pub fn typing_users(&self, chat_id: &str) -> Vec<UserId> {
        self.shared.typing.typing_users(chat_id)
    }

    // ==================== Teardown ====================

    /// Disconnect and release every timer, task and listener. Safe to call
    /// more than once.
    pub fn destroy(&self) {
        self.shared.typing.dispose_all();
        self.session.destroy();
        self.shared.pending.clear();
        if let Some(router) = self.router.lock().take() {
            router.abort();
            info!(user_id = %self.user_id, "Client destroyed");
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.destroy();
    }
}

//! Events the client publishes on its bus.

use crate::bus::BusEvent;
use crate::session::ConnectionState;
use necho_types::{ChatId, ErrorKind, Message, MessageId, PushEvent, UserId};
use std::fmt;

/// Kinds of [`ClientEvent`], named the way UI layers subscribe to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionState,
    ConnectionError,
    UserOnline,
    UserOffline,
    MessageNew,
    MessageEdited,
    MessageDeleted,
    TypingStart,
    TypingStop,
    ChatJoined,
    ChatLeft,
}

impl EventKind {
    /// Topic name, e.g. `message:new`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ConnectionState => "connection:state",
            EventKind::ConnectionError => "connection:error",
            EventKind::UserOnline => "user:online",
            EventKind::UserOffline => "user:offline",
            EventKind::MessageNew => "message:new",
            EventKind::MessageEdited => "message:edited",
            EventKind::MessageDeleted => "message:deleted",
            EventKind::TypingStart => "typing:start",
            EventKind::TypingStop => "typing:stop",
            EventKind::ChatJoined => "chat:joined",
            EventKind::ChatLeft => "chat:left",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a UI layer can observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The session moved to a new state.
    ConnectionState(ConnectionState),
    /// The transport failed.
    ConnectionError { kind: ErrorKind, message: String },
    UserOnline { user_id: UserId, username: String },
    UserOffline { user_id: UserId },
    MessageNew(Message),
    MessageEdited(Message),
    MessageDeleted { message_id: MessageId, chat_id: ChatId },
    /// A remote user started typing.
    TypingStart {
        chat_id: ChatId,
        user_id: UserId,
        username: String,
    },
    /// A remote user stopped typing, explicitly or by expiry.
    TypingStop { chat_id: ChatId, user_id: UserId },
    ChatJoined { chat_id: ChatId },
    ChatLeft { chat_id: ChatId },
}

impl BusEvent for ClientEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            ClientEvent::ConnectionState(_) => EventKind::ConnectionState,
            ClientEvent::ConnectionError { .. } => EventKind::ConnectionError,
            ClientEvent::UserOnline { .. } => EventKind::UserOnline,
            ClientEvent::UserOffline { .. } => EventKind::UserOffline,
            ClientEvent::MessageNew(_) => EventKind::MessageNew,
            ClientEvent::MessageEdited(_) => EventKind::MessageEdited,
            ClientEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
            ClientEvent::TypingStart { .. } => EventKind::TypingStart,
            ClientEvent::TypingStop { .. } => EventKind::TypingStop,
            ClientEvent::ChatJoined { .. } => EventKind::ChatJoined,
            ClientEvent::ChatLeft { .. } => EventKind::ChatLeft,
        }
    }
}

impl From<PushEvent> for ClientEvent {
    fn from(event: PushEvent) -> Self {
        match event {
            PushEvent::NewMessage(message) => ClientEvent::MessageNew(message),
            PushEvent::MessageEdited(message) => ClientEvent::MessageEdited(message),
            PushEvent::MessageDeleted {
                message_id,
                chat_id,
            } => ClientEvent::MessageDeleted {
                message_id,
                chat_id,
            },
            PushEvent::UserTyping {
                user_id,
                username,
                chat_id,
            } => ClientEvent::TypingStart {
                chat_id,
                user_id,
                username,
            },
            PushEvent::UserStoppedTyping { user_id, chat_id } => {
                ClientEvent::TypingStop { chat_id, user_id }
            }
            PushEvent::UserOnline { user_id, username } => {
                ClientEvent::UserOnline { user_id, username }
            }
            PushEvent::UserOffline { user_id } => ClientEvent::UserOffline { user_id },
        }
    }
}

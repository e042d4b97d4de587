//! Frames exchanged over a real-time connection.
//!
//! ## Client -> Server
//!
//! ```json
//! {"command": "join-chat", "id": 1, "chatId": "c1"}
//! {"command": "send-message", "id": 2, "chatId": "c1", "content": "hi", "type": "text"}
//! {"command": "typing-start", "chatId": "c1"}
//! {"command": "ping"}
//! ```
//!
//! Commands that expect an acknowledgment carry a correlation `id`; the server
//! answers each of them with exactly one `ack` frame echoing that id.
//!
//! ## Server -> Client
//!
//! ```json
//! {"type": "ack", "id": 2, "success": true, "message": {...}}
//! {"type": "ack", "id": 3, "success": false, "error": {"kind": "not-found", "message": "..."}}
//! {"type": "event", "event": "new-message", "data": {...}}
//! {"type": "pong"}
//! ```

use crate::error::{DomainError, ErrorKind};
use crate::message::{ChatId, Message, MessageId, MessageKind, UserId};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Maximum message body length, in characters.
pub const MAX_CONTENT_LENGTH: usize = 4096;

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn require_id(field: &str, value: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Payload of a `send-message` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Target chat.
    #[validate(length(min = 1))]
    pub chat_id: ChatId,
    /// Message body.
    #[validate(length(min = 1, max = 4096), custom(function = "not_blank"))]
    pub content: String,
    /// Content kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Message being replied to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    /// Attachment file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Attachment location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Client-generated correlation key, echoed back on the confirmed message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
}

impl SendMessage {
    /// A plain text message for a chat.
    pub fn text(chat_id: impl Into<ChatId>, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            content: content.into(),
            kind: MessageKind::Text,
            reply_to_id: None,
            file_name: None,
            file_url: None,
            client_ref: None,
        }
    }

    /// Reply to another message.
    pub fn replying_to(mut self, message_id: impl Into<MessageId>) -> Self {
        self.reply_to_id = Some(message_id.into());
        self
    }

    /// Attach a correlation key.
    pub fn with_client_ref(mut self, client_ref: impl Into<String>) -> Self {
        self.client_ref = Some(client_ref.into());
        self
    }
}

/// Payload of an `edit-message` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EditMessage {
    /// Message to edit.
    #[validate(length(min = 1))]
    pub message_id: MessageId,
    /// Replacement body.
    #[validate(length(min = 1, max = 4096), custom(function = "not_blank"))]
    pub content: String,
}

/// Commands a client can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Join a chat's room.
    JoinChat { chat_id: ChatId },
    /// Leave a chat's room.
    LeaveChat { chat_id: ChatId },
    /// Send a new message.
    SendMessage(SendMessage),
    /// Edit one of the caller's messages.
    EditMessage(EditMessage),
    /// Delete one of the caller's messages.
    DeleteMessage { message_id: MessageId },
    /// The caller started typing.
    TypingStart { chat_id: ChatId },
    /// The caller stopped typing.
    TypingStop { chat_id: ChatId },
    /// Heartbeat.
    Ping,
}

impl ClientCommand {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::JoinChat { .. } => "join-chat",
            ClientCommand::LeaveChat { .. } => "leave-chat",
            ClientCommand::SendMessage(_) => "send-message",
            ClientCommand::EditMessage(_) => "edit-message",
            ClientCommand::DeleteMessage { .. } => "delete-message",
            ClientCommand::TypingStart { .. } => "typing-start",
            ClientCommand::TypingStop { .. } => "typing-stop",
            ClientCommand::Ping => "ping",
        }
    }

    /// Whether the server answers this command with an ack.
    pub fn expects_ack(&self) -> bool {
        !matches!(
            self,
            ClientCommand::TypingStart { .. } | ClientCommand::TypingStop { .. } | ClientCommand::Ping
        )
    }

    /// Check the payload shape before any domain work happens.
    pub fn validate_shape(&self) -> Result<(), DomainError> {
        match self {
            ClientCommand::JoinChat { chat_id }
            | ClientCommand::LeaveChat { chat_id }
            | ClientCommand::TypingStart { chat_id }
            | ClientCommand::TypingStop { chat_id } => require_id("chatId", chat_id),
            ClientCommand::SendMessage(payload) => Ok(payload.validate()?),
            ClientCommand::EditMessage(payload) => Ok(payload.validate()?),
            ClientCommand::DeleteMessage { message_id } => require_id("messageId", message_id),
            ClientCommand::Ping => Ok(()),
        }
    }
}

/// A command plus its optional correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    /// Correlation id; present on every command that expects an ack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// The command.
    #[serde(flatten)]
    pub command: ClientCommand,
}

impl ClientFrame {
    /// A frame that expects an ack under `id`.
    pub fn request(id: u64, command: ClientCommand) -> Self {
        Self {
            id: Some(id),
            command,
        }
    }

    /// A fire-and-forget frame.
    pub fn notify(command: ClientCommand) -> Self {
        Self { id: None, command }
    }

    /// Best-effort extraction of the correlation id from a frame that failed
    /// to parse, so the sender still gets an ack.
    pub fn recover_id(text: &str) -> Option<u64> {
        serde_json::from_str::<serde_json::Value>(text)
            .ok()?
            .get("id")?
            .as_u64()
    }
}

/// Error half of a failed acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckError {
    /// Classification.
    pub kind: ErrorKind,
    /// Human-readable reason.
    pub message: String,
}

/// Response to a command that carried a correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Correlation id of the command being answered.
    pub id: u64,
    /// Whether the command succeeded.
    pub success: bool,
    /// Authoritative message for send/edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AckError>,
}

impl Ack {
    /// Success without payload.
    pub fn ok(id: u64) -> Self {
        Self {
            id,
            success: true,
            message: None,
            error: None,
        }
    }

    /// Success carrying the resulting message.
    pub fn with_message(id: u64, message: Message) -> Self {
        Self {
            message: Some(message),
            ..Self::ok(id)
        }
    }

    /// Failure.
    pub fn failed(id: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            message: None,
            error: Some(AckError {
                kind,
                message: message.into(),
            }),
        }
    }
}

/// Events pushed from the server to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum PushEvent {
    /// A message was sent.
    NewMessage(Message),
    /// A message was edited.
    MessageEdited(Message),
    /// A message was deleted.
    MessageDeleted { message_id: MessageId, chat_id: ChatId },
    /// A user started typing.
    UserTyping {
        user_id: UserId,
        username: String,
        chat_id: ChatId,
    },
    /// A user stopped typing.
    UserStoppedTyping { user_id: UserId, chat_id: ChatId },
    /// A user came online.
    UserOnline { user_id: UserId, username: String },
    /// A user went offline.
    UserOffline { user_id: UserId },
}

impl PushEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            PushEvent::NewMessage(_) => "new-message",
            PushEvent::MessageEdited(_) => "message-edited",
            PushEvent::MessageDeleted { .. } => "message-deleted",
            PushEvent::UserTyping { .. } => "user-typing",
            PushEvent::UserStoppedTyping { .. } => "user-stopped-typing",
            PushEvent::UserOnline { .. } => "user-online",
            PushEvent::UserOffline { .. } => "user-offline",
        }
    }

    /// Chat the event is scoped to, if any.
    pub fn chat_id(&self) -> Option<&str> {
        match self {
            PushEvent::NewMessage(m) | PushEvent::MessageEdited(m) => Some(&m.chat_id),
            PushEvent::MessageDeleted { chat_id, .. }
            | PushEvent::UserTyping { chat_id, .. }
            | PushEvent::UserStoppedTyping { chat_id, .. } => Some(chat_id),
            PushEvent::UserOnline { .. } | PushEvent::UserOffline { .. } => None,
        }
    }
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Acknowledgment of a command.
    Ack(Ack),
    /// Pushed domain event.
    Event(PushEvent),
    /// Heartbeat response.
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_client_frame_wire_shape() {
        let frame = ClientFrame::request(
            7,
            ClientCommand::JoinChat {
                chat_id: "c1".into(),
            },
        );
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["command"], "join-chat");
        assert_eq!(json["id"], 7);
        assert_eq!(json["chatId"], "c1");

        let parsed: ClientFrame = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_send_message_parse() {
        let parsed: ClientFrame = serde_json::from_str(
            r#"{"command":"send-message","id":3,"chatId":"c1","content":"hi","type":"image","replyToId":"m9"}"#,
        )
        .unwrap();
        match parsed.command {
            ClientCommand::SendMessage(payload) => {
                assert_eq!(payload.chat_id, "c1");
                assert_eq!(payload.kind, MessageKind::Image);
                assert_eq!(payload.reply_to_id.as_deref(), Some("m9"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_notify_frame_has_no_id() {
        let frame = ClientFrame::notify(ClientCommand::TypingStart {
            chat_id: "c1".into(),
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(!json.contains("\"id\""));
        assert!(!frame.command.expects_ack());
    }

    #[test]
    fn test_validate_shape() {
        let blank = ClientCommand::SendMessage(SendMessage::text("c1", "   "));
        assert!(matches!(
            blank.validate_shape(),
            Err(DomainError::Validation(_))
        ));

        let too_long = ClientCommand::SendMessage(SendMessage::text(
            "c1",
            "x".repeat(MAX_CONTENT_LENGTH + 1),
        ));
        assert!(too_long.validate_shape().is_err());

        let no_chat = ClientCommand::JoinChat {
            chat_id: String::new(),
        };
        assert!(no_chat.validate_shape().is_err());

        let ok = ClientCommand::EditMessage(EditMessage {
            message_id: "m1".into(),
            content: "fixed".into(),
        });
        assert!(ok.validate_shape().is_ok());
    }

    #[test]
    fn test_recover_id() {
        assert_eq!(
            ClientFrame::recover_id(r#"{"command":"bogus","id":12}"#),
            Some(12)
        );
        assert_eq!(ClientFrame::recover_id("not json"), None);
    }

    #[test]
    fn test_ack_wire_shape() {
        let ack = Ack::failed(4, ErrorKind::PermissionDenied, "not a participant");
        let json = serde_json::to_value(ServerFrame::Ack(ack.clone())).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "permission-denied");
        assert!(json.get("message").is_none());

        let parsed: ServerFrame = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ServerFrame::Ack(ack));
    }

    #[test]
    fn test_push_event_wire_shape() {
        let event = PushEvent::UserTyping {
            user_id: "u1".into(),
            username: "alice".into(),
            chat_id: "c1".into(),
        };
        let json = serde_json::to_value(ServerFrame::Event(event.clone())).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "user-typing");
        assert_eq!(json["data"]["chatId"], "c1");
        assert_eq!(json["data"]["username"], "alice");

        let parsed: ServerFrame = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ServerFrame::Event(event));
    }

    #[test]
    fn test_push_event_chat_scope() {
        let deleted = PushEvent::MessageDeleted {
            message_id: "m1".into(),
            chat_id: "c1".into(),
        };
        assert_eq!(deleted.chat_id(), Some("c1"));
        assert_eq!(deleted.name(), "message-deleted");

        let online = PushEvent::UserOnline {
            user_id: "u1".into(),
            username: "alice".into(),
        };
        assert_eq!(online.chat_id(), None);
    }

    #[test]
    fn test_pong_wire_shape() {
        let json = serde_json::to_string(&ServerFrame::Pong).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    fn content_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[ \t\n]{0,4}",
            "\\PC{1,64}",
            "x{4090,4100}",
        ]
    }

    proptest! {
        #[test]
        fn prop_send_frame_keeps_id_and_payload(
            id in any::<u64>(),
            chat_id in "[a-z0-9-]{1,16}",
            content in content_strategy(),
            client_ref in proptest::option::of("[a-f0-9]{8}"),
        ) {
            let mut payload = SendMessage::text(chat_id, content);
            payload.client_ref = client_ref;
            let frame = ClientFrame::request(id, ClientCommand::SendMessage(payload));

            let text = serde_json::to_string(&frame).unwrap();
            prop_assert_eq!(ClientFrame::recover_id(&text), Some(id));
            let parsed: ClientFrame = serde_json::from_str(&text).unwrap();
            prop_assert_eq!(parsed, frame);
        }

        #[test]
        fn prop_content_shape_rule(content in content_strategy()) {
            let expected = !content.trim().is_empty()
                && content.chars().count() <= MAX_CONTENT_LENGTH;
            let command = ClientCommand::SendMessage(SendMessage::text("c1", content));
            prop_assert_eq!(command.validate_shape().is_ok(), expected);
        }
    }
}

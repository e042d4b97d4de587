//! The confirmed chat message record.

use serde::{Deserialize, Serialize};

/// Identifier of a user.
pub type UserId = String;

/// Identifier of a chat (and of the room that carries its broadcasts).
pub type ChatId = String;

/// Server-assigned identifier of a message.
pub type MessageId = String;

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    #[default]
    Text,
    /// Image attachment.
    Image,
    /// Generic file attachment.
    File,
    /// Audio clip.
    Audio,
}

/// A server-confirmed message.
///
/// Identity is the `id`: two records describe the same message iff their ids
/// match, even when one of them is a later edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Chat the message belongs to.
    pub chat_id: ChatId,
    /// Author.
    pub sender_id: UserId,
    /// Message body.
    pub content: String,
    /// Content kind.
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    /// Attachment file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Attachment location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Whether the message was edited after it was sent.
    #[serde(default)]
    pub edited: bool,
    /// When the last edit happened (Unix millis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<u64>,
    /// Message this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<MessageId>,
    /// Correlation key the sending client attached to its `send-message`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<String>,
    /// When the server accepted the message (Unix millis).
    pub created_at: u64,
}

impl Message {
    /// Whether both records describe the same message.
    pub fn is_same(&self, other: &Message) -> bool {
        self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Message {
        Message {
            id: "m1".into(),
            chat_id: "c1".into(),
            sender_id: "alice".into(),
            content: "hi".into(),
            kind: MessageKind::Text,
            file_name: None,
            file_url: None,
            edited: false,
            edited_at: None,
            reply_to_id: None,
            client_ref: None,
            created_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["chatId"], "c1");
        assert_eq!(json["senderId"], "alice");
        assert_eq!(json["type"], "text");
        assert!(json.get("replyToId").is_none());
    }

    #[test]
    fn test_message_defaults_on_parse() {
        let parsed: Message = serde_json::from_str(
            r#"{"id":"m2","chatId":"c1","senderId":"bob","content":"yo","createdAt":5}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind, MessageKind::Text);
        assert!(!parsed.edited);
        assert_eq!(parsed.created_at, 5);
    }

    #[test]
    fn test_identity_is_the_id() {
        let original = sample();
        let mut edited = sample();
        edited.content = "hello".into();
        edited.edited = true;
        assert!(original.is_same(&edited));
        assert_ne!(original, edited);
    }
}

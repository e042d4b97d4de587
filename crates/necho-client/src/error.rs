//! Error types for the messenger client.

use necho_types::{AckError, ErrorKind};
use thiserror::Error;

/// Errors surfaced to callers of the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The session is not in the `Connected` state.
    #[error("not connected")]
    NotConnected,

    /// No acknowledgment arrived in time.
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    /// The server answered with a failure ack.
    #[error("rejected ({kind}): {message}")]
    Rejected { kind: ErrorKind, message: String },

    /// The transport could not be opened or broke.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server refused the credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A frame could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// History request failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The client was destroyed.
    #[error("client destroyed")]
    Destroyed,

    /// An internal channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl ClientError {
    /// Classification shared with server acks.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NotConnected
            | ClientError::Transport(_)
            | ClientError::Http(_)
            | ClientError::Destroyed
            | ClientError::ChannelClosed => ErrorKind::Transport,
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::Rejected { kind, .. } => *kind,
            ClientError::Auth(_) => ErrorKind::Auth,
            ClientError::Serialization(_) => ErrorKind::Validation,
        }
    }

    /// Whether retrying later could succeed without changing the request.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }
}

impl From<AckError> for ClientError {
    fn from(error: AckError) -> Self {
        ClientError::Rejected {
            kind: error.kind,
            message: error.message,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ClientError::NotConnected.kind(), ErrorKind::Transport);
        assert_eq!(
            ClientError::Timeout { operation: "join-chat" }.kind(),
            ErrorKind::Timeout
        );

        let rejected = ClientError::from(AckError {
            kind: ErrorKind::PermissionDenied,
            message: "not a participant".into(),
        });
        assert_eq!(rejected.kind(), ErrorKind::PermissionDenied);
        assert!(!rejected.is_transient());
        assert!(ClientError::Timeout { operation: "send-message" }.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::Timeout { operation: "send-message" };
        assert_eq!(err.to_string(), "send-message timed out");
    }
}

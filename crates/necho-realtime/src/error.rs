//! Error types for the real-time gateway.

use necho_types::{DomainError, ErrorKind};
use thiserror::Error;

/// Errors that can occur in gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or invalid bearer credential.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Room limit per connection exceeded.
    #[error("room limit exceeded: max {0} rooms")]
    RoomLimit(usize),

    /// Connection limit reached.
    #[error("connection limit reached: max {0} connections")]
    ConnectionLimit(usize),

    /// Connection not found.
    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    /// Rejected by the domain service.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Channel closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl GatewayError {
    /// Wire classification used in error acks.
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Auth(_) => ErrorKind::Auth,
            GatewayError::RoomLimit(_) | GatewayError::Serialization(_) => ErrorKind::Validation,
            GatewayError::ConnectionNotFound(_) => ErrorKind::NotFound,
            GatewayError::ConnectionLimit(_) | GatewayError::ChannelClosed => ErrorKind::Transport,
            GatewayError::Domain(e) => e.kind(),
        }
    }
}

//! Error classification shared by server acks and client results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a failure, carried on the wire inside error acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Connection dropped or could not be established.
    Transport,
    /// Missing or invalid bearer credential.
    Auth,
    /// A local wait for an acknowledgment ran out.
    Timeout,
    /// The room or authorization check failed server-side.
    PermissionDenied,
    /// The referenced chat or message does not exist.
    NotFound,
    /// The command payload was malformed.
    Validation,
    /// Anything the server could not classify.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::PermissionDenied => write!(f, "permission-denied"),
            ErrorKind::NotFound => write!(f, "not-found"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Errors raised by the domain collaborators (chat membership, message store).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The user lacks permission for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The credential could not be verified.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Storage or other internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Wire classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::Unauthorized(_) => ErrorKind::Auth,
            DomainError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<validator::ValidationErrors> for DomainError {
    fn from(errors: validator::ValidationErrors) -> Self {
        DomainError::Validation(errors.to_string())
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

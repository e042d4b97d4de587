//! Common types used throughout `necho`.
//!
//! This crate holds the records and frames both sides of a real-time
//! connection agree on:
//!
//! - [`Message`]: the confirmed chat message record
//! - [`ClientFrame`] / [`ClientCommand`]: client to server commands
//! - [`ServerFrame`] / [`Ack`] / [`PushEvent`]: server to client traffic
//! - [`ErrorKind`] / [`DomainError`]: error classification carried in acks
//! - [`HistoryPage`]: paging parameters for message history

mod error;
mod message;
mod pagination;
mod protocol;

pub use error::{DomainError, ErrorKind, Result};
pub use message::{now_millis, ChatId, Message, MessageId, MessageKind, UserId};
pub use pagination::{HistoryPage, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use protocol::{
    Ack, AckError, ClientCommand, ClientFrame, EditMessage, PushEvent, SendMessage, ServerFrame,
    MAX_CONTENT_LENGTH,
};

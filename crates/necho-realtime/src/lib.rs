//! # Necho Real-time
//!
//! Server side of the Necho messenger's real-time core.
//!
//! A [`BroadcastGateway`] authenticates each incoming connection with a bearer
//! token, keeps a user -> connection registry for point-to-point delivery,
//! tracks which chat rooms every connection has joined, and validates each
//! command against a [`DomainService`] before broadcasting the resulting event
//! to the room.
//!
//! ## Features
//!
//! - **Authentication**: connections without a valid token never get registered
//! - **Presence**: `user-online` / `user-offline` with multi-device awareness
//! - **Rooms**: a chat event only reaches connections that joined its room
//! - **Acknowledgments**: every command carrying an `id` gets exactly one `ack`
//! - **Typing relay**: ephemeral, never echoed to the sender
//!
//! ## Example
//!
//! ```rust
//! use necho_realtime::{BroadcastGateway, ConnectionMetadata, GatewayConfig, MemoryStore};
//! use necho_types::{ClientCommand, SendMessage};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let store = Arc::new(MemoryStore::new());
//! let alice = store.create_user("alice").unwrap();
//! let chat = store.create_chat(None, [alice.id.clone()]).unwrap();
//! let token = store.issue_token(&alice.id).unwrap();
//!
//! let gateway = BroadcastGateway::with_store(store, GatewayConfig::default());
//! let (conn, mut frames) = gateway.open(Some(&token), ConnectionMetadata::now()).await.unwrap();
//!
//! gateway
//!     .handle_command(&conn, ClientCommand::JoinChat { chat_id: chat.id.clone() })
//!     .await
//!     .unwrap();
//! gateway
//!     .handle_command(&conn, ClientCommand::SendMessage(SendMessage::text(&chat.id, "hi")))
//!     .await
//!     .unwrap();
//!
//! assert!(frames.try_recv().unwrap().contains("new-message"));
//! # });
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            BroadcastGateway              │
//! │  ┌────────────────────────────────────┐  │
//! │  │ connections: id -> Connection      │  │
//! │  │    └─> identity (one user)         │  │
//! │  │    └─> joined rooms                │  │
//! │  │    └─> frame sender                │  │
//! │  └────────────────────────────────────┘  │
//! │  ┌────────────────────────────────────┐  │
//! │  │ presence: user -> latest conn id   │  │
//! │  └────────────────────────────────────┘  │
//! │        │ TokenVerifier                   │
//! │        │ DomainService                   │
//! │        │ PresenceStore                   │
//! └────────┴─────────────────────────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod gateway;
pub mod room;
pub mod service;
pub mod session;
pub mod store;

// Re-export main types
pub use connection::{Connection, ConnectionId, ConnectionMetadata, ConnectionReceiver};
pub use error::GatewayError;
pub use gateway::{BroadcastGateway, CommandOutcome, GatewayConfig, GatewayStats, DEFAULT_MAX_CONNECTIONS};
pub use room::{room_name, RoomSet, MAX_ROOMS_PER_CONNECTION};
pub use service::{DomainService, Identity, PresenceStore, TokenVerifier};
pub use session::run_connection;
pub use store::{Chat, MemoryStore, User};

//! Client side of the Necho real-time messenger.
//!
//! A [`ChatClient`] owns one [`ConnectionSession`] and layers on top of it:
//!
//! - [`RoomMembership`]: acknowledged join/leave, rejoined after reconnects
//! - [`CommandDispatcher`]: send/edit/delete awaiting an ack or a timeout
//! - [`TypingTracker`]: debounced local signals, expiring remote sets
//! - [`OptimisticReconciler`]: one timeline from history, pushes and local sends
//! - [`EventBus`]: typed publish/subscribe for UI layers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌────────────────────┐  acks    ┌──────────────┐
//! │  Connector   │──────────►│ ConnectionSession  │─────────►│ PendingAcks  │
//! │ (WebSocket)  │◄──────────│ (state machine)    │          └──────────────┘
//! └──────────────┘           └─────────┬──────────┘
//!                                      │ events
//!                     ┌────────────────┼─────────────────┐
//!                     ▼                ▼                 ▼
//!              TypingTracker   OptimisticReconciler   EventBus
//! ```
//!
//! # Example
//!
//! ```no_run
//! use necho_client::{ChatClient, ClientConfig, EventKind};
//! use necho_types::SendMessage;
//!
//! # async fn run() -> necho_client::Result<()> {
//! let config = ClientConfig::new("ws://localhost:8080/ws", "token")
//!     .with_history_url("http://localhost:8080");
//! let client = ChatClient::websocket(config, "alice");
//!
//! client.on(EventKind::MessageNew, |event| println!("{:?}", event));
//! client.connect()?;
//! client.join_chat("general").await?;
//! client
//!     .send_message_optimistic(SendMessage::text("general", "hello"))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod client;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod history;
pub mod pending;
pub mod reconciler;
pub mod rooms;
pub mod session;
pub mod transport;
pub mod typing;

#[cfg(test)]
mod testing;

pub use bus::{BusEvent, EventBus, Subscription};
pub use client::{ChatClient, ClientConfig};
pub use dispatcher::{CommandDispatcher, DEFAULT_COMMAND_TIMEOUT};
pub use error::{ClientError, Result};
pub use event::{ClientEvent, EventKind};
pub use history::{HistorySource, HttpHistory};
pub use pending::PendingAcks;
pub use reconciler::{OptimisticMessage, OptimisticReconciler, TimelineEntry};
pub use rooms::{RoomMembership, DEFAULT_JOIN_TIMEOUT};
pub use session::{
    ConnectionSession, ConnectionState, ReconnectPolicy, SessionAction, SessionConfig,
    SessionMachine, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_BASE_DELAY,
};
pub use transport::{Connector, Link, WsConnector};
pub use typing::{TypingSink, TypingTracker, TYPING_DEBOUNCE, TYPING_TIMEOUT};

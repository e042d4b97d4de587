//! # Necho Node
//!
//! HTTP and WebSocket server hosting one [`BroadcastGateway`] per process.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 Necho Node                   │
//! │                                              │
//! │   axum router                                │
//! │   ├── /health                                │
//! │   ├── /api/messages/chat/{chat_id}  history  │
//! │   ├── /api/realtime/stats                    │
//! │   └── /ws  ──► BroadcastGateway ──► rooms    │
//! │                      │                       │
//! │                  MemoryStore                 │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin necho-node -- --api-addr 127.0.0.1:8080 --demo-user alice --demo-user bob
//! ```
//!
//! ## Modules
//!
//! - [`api`] - router, history endpoint, error mapping
//! - [`realtime_api`] - the authenticated WebSocket endpoint
//! - [`config`] - layered node configuration
//! - [`demo`] - seeded accounts for local development
//! - [`observability`] - logging setup
//!
//! [`BroadcastGateway`]: necho_realtime::BroadcastGateway

pub mod api;
pub mod config;
pub mod demo;
pub mod observability;
pub mod realtime_api;

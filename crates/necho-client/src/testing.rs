//! Test doubles shared by the unit tests.

use crate::error::{ClientError, Result};
use crate::session::{ConnectionSession, ConnectionState};
use crate::transport::{Connector, Link};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connector whose links are driven by the test.
pub(crate) struct ScriptedConnector {
    results: Mutex<VecDeque<Result<Link>>>,
    attempts: AtomicU64,
}

/// The server's ends of a scripted link: what the client sent, and a sender
/// for frames back to the client. Dropping `to_client` closes the transport.
pub(crate) struct ServerEnd {
    pub from_client: mpsc::UnboundedReceiver<String>,
    pub to_client: mpsc::UnboundedSender<String>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(VecDeque::new()),
            attempts: AtomicU64::new(0),
        })
    }

    /// Queue a successful link.
    pub(crate) fn push_link(&self) -> ServerEnd {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.results.lock().push_back(Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        }));
        ServerEnd {
            from_client: out_rx,
            to_client: in_tx,
        }
    }

    /// Number of connect calls so far.
    pub(crate) fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<Link> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Transport("connection refused".into())))
    }
}

/// Wait until the session reaches `state`.
pub(crate) async fn wait_for(session: &ConnectionSession, state: ConnectionState) {
    let mut rx = session.state_changes();
    rx.wait_for(|s| *s == state).await.unwrap();
}

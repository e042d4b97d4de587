//! Correlation of acknowledged commands with their acks.

use crate::error::{ClientError, Result};
use crate::session::ConnectionSession;
use necho_types::{Ack, ClientCommand, ClientFrame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

/// Waiters for outstanding acks, keyed by correlation id.
#[derive(Debug, Default)]
pub struct PendingAcks {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Ack>>>,
}

impl PendingAcks {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a correlation id and the receiver its ack will arrive on.
    pub fn register(&self) -> (u64, oneshot::Receiver<Ack>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id, tx);
        (id, rx)
    }

    /// Hand an ack to its waiter. Returns `false` for unknown or expired ids.
    pub fn resolve(&self, ack: Ack) -> bool {
        let Some(waiter) = self.waiters.lock().remove(&ack.id) else {
            debug!(id = ack.id, "Ack for unknown or expired request");
            return false;
        };
        waiter.send(ack).is_ok()
    }

    /// Drop a waiter without resolving it.
    pub fn forget(&self, id: u64) {
        self.waiters.lock().remove(&id);
    }

    /// Drop every waiter; their calls fail with `ChannelClosed`.
    pub fn clear(&self) {
        self.waiters.lock().clear();
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether no request is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send `command` and wait for its ack or the timeout, whichever is first.
    ///
    /// Fails without sending when the session is not connected. A failure
    /// ack becomes [`ClientError::Rejected`], a missed deadline
    /// [`ClientError::Timeout`]. Dropping the future releases the waiter.
    pub async fn call(
        &self,
        session: &ConnectionSession,
        command: ClientCommand,
        timeout: Duration,
    ) -> Result<Ack> {
        let operation = command.name();
        let (id, rx) = self.register();
        let _waiter = Waiter { pending: self, id };

        session.send_frame(&ClientFrame::request(id, command))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(ack)) if ack.success => Ok(ack),
            Ok(Ok(ack)) => Err(match ack.error {
                Some(error) => error.into(),
                None => ClientError::Rejected {
                    kind: necho_types::ErrorKind::Internal,
                    message: format!("{} failed", operation),
                },
            }),
            Ok(Err(_)) => Err(ClientError::ChannelClosed),
            Err(_) => {
                debug!(id, operation, "Request timed out");
                Err(ClientError::Timeout { operation })
            }
        }
    }
}

/// Removes its table entry however the call ends.
struct Waiter<'a> {
    pending: &'a PendingAcks,
    id: u64,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.pending.forget(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use necho_types::ErrorKind;

    #[test]
    fn test_register_and_resolve() {
        let pending = PendingAcks::new();
        let (a, mut rx_a) = pending.register();
        let (b, _rx_b) = pending.register();
        assert_ne!(a, b);
        assert_eq!(pending.len(), 2);

        assert!(pending.resolve(Ack::ok(a)));
        assert_eq!(rx_a.try_recv().unwrap().id, a);
        assert!(!pending.resolve(Ack::ok(a)));

        pending.forget(b);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_resolve_failure_ack() {
        let pending = PendingAcks::new();
        let (id, mut rx) = pending.register();

        pending.resolve(Ack::failed(id, ErrorKind::NotFound, "chat c9"));

        let ack = rx.try_recv().unwrap();
        assert!(!ack.success);
        let err = ClientError::from(ack.error.unwrap());
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_clear_drops_waiters() {
        let pending = PendingAcks::new();
        let (_, mut rx) = pending.register();
        pending.clear();
        assert!(rx.try_recv().is_err());
    }
}

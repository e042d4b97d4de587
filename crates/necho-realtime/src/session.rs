//! Per-connection command loop.

use crate::connection::Connection;
use crate::gateway::BroadcastGateway;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Feed one connection's inbound frames to the gateway in arrival order.
///
/// Each frame is fully handled before the next is read, so a connection's
/// commands are never reordered. The connection is disconnected when the
/// inbound stream ends.
pub async fn run_connection(
    gateway: Arc<BroadcastGateway>,
    connection: Arc<Connection>,
    mut inbound: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = inbound.recv().await {
        debug!(connection_id = %connection.id, bytes = text.len(), "Inbound frame");
        gateway.handle_text(&connection, &text).await;
    }

    gateway.disconnect(&connection.id).await;
}

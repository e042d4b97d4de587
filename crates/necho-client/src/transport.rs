//! Transport seam between the session and the wire.
//!
//! A [`Link`] is a pair of text channels. The session never sees sockets: it
//! writes frames to `outgoing` and treats the end of `incoming` as the
//! transport going away. Dropping `outgoing` closes the transport.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::tungstenite::Error as WsError;
use tracing::{debug, warn};

/// An open transport.
#[derive(Debug)]
pub struct Link {
    /// Frames to the server.
    pub outgoing: mpsc::UnboundedSender<String>,
    /// Frames from the server; ends when the transport closes.
    pub incoming: mpsc::UnboundedReceiver<String>,
}

/// Opens transports to the gateway.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new authenticated transport.
    async fn connect(&self) -> Result<Link>;
}

/// WebSocket connector presenting a bearer token in the handshake.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    token: String,
}

impl WsConnector {
    /// Create a connector for a `ws://` or `wss://` endpoint.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::Transport(format!("invalid url {}: {}", self.url, e)))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|_| ClientError::Auth("token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _) = match tokio_tungstenite::connect_async(request).await {
            Ok(ok) => ok,
            Err(WsError::Http(response)) if response.status().as_u16() == 401 => {
                return Err(ClientError::Auth("server rejected the bearer token".to_string()));
            }
            Err(e) => return Err(ClientError::Transport(e.to_string())),
        };
        debug!(url = %self.url, "WebSocket connected");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Writer: runs until the session drops its sender
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Reader: ends the incoming channel when the socket closes
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        debug!(frame = ?frame, "WebSocket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

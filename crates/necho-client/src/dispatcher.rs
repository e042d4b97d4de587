//! Acknowledged message commands.

use crate::error::{ClientError, Result};
use crate::pending::PendingAcks;
use crate::session::ConnectionSession;
use crate::typing::TypingSink;
use necho_types::{
    Ack, ClientCommand, ClientFrame, EditMessage, ErrorKind, Message, MessageId, SendMessage,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default wait for a message command's ack.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends send/edit/delete as acknowledged remote calls.
#[derive(Debug, Clone)]
pub struct CommandDispatcher {
    session: ConnectionSession,
    pending: Arc<PendingAcks>,
    timeout: Duration,
}

impl CommandDispatcher {
    /// Create a dispatcher sharing the session's ack table.
    pub fn new(session: ConnectionSession, pending: Arc<PendingAcks>, timeout: Duration) -> Self {
        Self {
            session,
            pending,
            timeout,
        }
    }

    /// Send a message; resolves with the server's authoritative copy.
    pub async fn send_message(&self, payload: SendMessage) -> Result<Message> {
        let ack = self
            .pending
            .call(&self.session, ClientCommand::SendMessage(payload), self.timeout)
            .await?;
        authoritative(ack)
    }

    /// Replace a message's content.
    pub async fn edit_message(
        &self,
        message_id: impl Into<MessageId>,
        content: impl Into<String>,
    ) -> Result<Message> {
        let command = ClientCommand::EditMessage(EditMessage {
            message_id: message_id.into(),
            content: content.into(),
        });
        let ack = self.pending.call(&self.session, command, self.timeout).await?;
        authoritative(ack)
    }

    /// Delete a message.
    pub async fn delete_message(&self, message_id: impl Into<MessageId>) -> Result<()> {
        let command = ClientCommand::DeleteMessage {
            message_id: message_id.into(),
        };
        self.pending.call(&self.session, command, self.timeout).await?;
        Ok(())
    }
}

fn authoritative(ack: Ack) -> Result<Message> {
    ack.message.ok_or_else(|| ClientError::Rejected {
        kind: ErrorKind::Internal,
        message: "ack carried no message".to_string(),
    })
}

impl TypingSink for CommandDispatcher {
    fn typing(&self, chat_id: &str, active: bool) {
        let chat_id = chat_id.to_string();
        let command = if active {
            ClientCommand::TypingStart { chat_id }
        } else {
            ClientCommand::TypingStop { chat_id }
        };
        if let Err(e) = self.session.send_frame(&ClientFrame::notify(command)) {
            debug!(error = %e, "Typing signal not sent");
        }
    }
}

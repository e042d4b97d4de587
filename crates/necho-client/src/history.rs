//! Paginated message history.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use necho_types::{ErrorKind, HistoryPage, Message};
use reqwest::StatusCode;
use tracing::debug;

/// Fetches pages of confirmed messages for a chat.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// One page, newest messages first.
    async fn fetch_page(&self, chat_id: &str, page: HistoryPage) -> Result<Vec<Message>>;
}

/// History over the node's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpHistory {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpHistory {
    /// Create a source for a node at `base_url` (e.g. `http://localhost:8080`).
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    /// Create a source reusing an existing HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, chat_id: &str) -> String {
        format!("{}/api/messages/chat/{}", self.base_url, chat_id)
    }
}

#[async_trait]
impl HistorySource for HttpHistory {
    async fn fetch_page(&self, chat_id: &str, page: HistoryPage) -> Result<Vec<Message>> {
        let page = page.normalized();
        debug!(chat_id, page = page.page, limit = page.limit, "Fetching history");

        let response = self
            .client
            .get(self.url(chat_id))
            .bearer_auth(&self.token)
            .query(&[("page", page.page), ("limit", page.limit)])
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED => Err(ClientError::Auth("history request refused".into())),
            StatusCode::FORBIDDEN => Err(ClientError::Rejected {
                kind: ErrorKind::PermissionDenied,
                message: format!("not a participant of chat {}", chat_id),
            }),
            StatusCode::NOT_FOUND => Err(ClientError::Rejected {
                kind: ErrorKind::NotFound,
                message: format!("chat {}", chat_id),
            }),
            status => Err(ClientError::Transport(format!(
                "history request failed with {}",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() {
        let history = HttpHistory::new("http://localhost:8080/", "t");
        assert_eq!(
            history.url("c1"),
            "http://localhost:8080/api/messages/chat/c1"
        );
    }
}

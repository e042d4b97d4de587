//! Page parameters for message history.

use serde::{Deserialize, Serialize};

/// Default number of messages per page.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Maximum number of messages per page.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A history page request (1-indexed, newest messages first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Page number (1-indexed).
    #[serde(default = "default_page")]
    pub page: u32,

    /// Messages per page.
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_SIZE
}

impl Default for HistoryPage {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl HistoryPage {
    /// Create page parameters clamped to valid ranges.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_SIZE),
        }
    }

    /// Normalize parameters that came in from a query string.
    pub fn normalized(self) -> Self {
        Self::new(self.page, self.limit)
    }

    /// Number of messages to skip.
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.limit as usize
    }
}

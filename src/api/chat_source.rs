//! Remote chat source abstraction.
//!
//! The polling coordinator only talks to the remote chat service through the
//! [`ChatSource`] trait. Every transport failure is mapped to a typed error at
//! this boundary so that retry policy stays with the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Handle of an active chat session (YouTube `liveChatId`).
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(pub String);

/// Continuation cursor returned by the source for the next page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

/// A raw chat item as delivered by the source, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawChatItem {
    pub author: String,
    pub text: String,
    /// Epoch seconds taken from the source timestamp (ingestion time if unparsable)
    pub timestamp: f64,
}

/// One page of chat items.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPage {
    pub records: Vec<RawChatItem>,
    pub next_cursor: Option<Cursor>,
    pub suggested_interval: Duration,
    /// The source reported that the chat went offline with this page
    pub offline: bool,
}

impl ChatPage {
    pub fn new(records: Vec<RawChatItem>, next_cursor: Option<Cursor>) -> Self {
        Self {
            records,
            next_cursor,
            suggested_interval: Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS),
            offline: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.suggested_interval = interval;
        self
    }
}

/// Interval used when the source does not suggest one.
pub const DEFAULT_POLLING_INTERVAL_MS: u64 = 5_000;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("API key rejected: {0}")]
    InvalidKey(String),
    #[error("Authentication request failed: {0}")]
    Transport(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Stream is not live or has no active chat")]
    NotLive,
    #[error("Stream not found")]
    NotFound,
    #[error("Failed to resolve chat session: {0}")]
    Transport(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Retryable failure (network, timeout, 5xx, quota hiccup)
    #[error("Transient fetch error: {0}")]
    Transient(String),
    /// The chat is closed for good
    #[error("Live chat ended: {0}")]
    ChatEnded(String),
}

/// Remote live-chat service.
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Verify that the configured credentials are usable.
    async fn authenticate(&self) -> Result<(), AuthError>;

    /// Look up the active chat session of a stream.
    async fn resolve_session(&self, stream_id: &str) -> Result<SessionHandle, ResolveError>;

    /// Fetch the page following `cursor` (or the latest page when `None`).
    async fn fetch_page(
        &self,
        session: &SessionHandle,
        cursor: Option<&Cursor>,
    ) -> Result<ChatPage, FetchError>;

    /// Source name for logging
    fn source_name(&self) -> &'static str {
        "chat-source"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_display_and_serialization() {
        let cursor = Cursor("GJ3k2xYz".to_string());
        assert_eq!(format!("{}", cursor), "GJ3k2xYz");
        assert_eq!(serde_json::to_string(&cursor).unwrap(), "\"GJ3k2xYz\"");
    }

    #[test]
    fn test_chat_page_defaults() {
        let page = ChatPage::new(vec![], Some(Cursor("c1".to_string())));
        assert_eq!(
            page.suggested_interval,
            Duration::from_millis(DEFAULT_POLLING_INTERVAL_MS)
        );
        assert!(!page.offline);

        let page = page.with_interval(Duration::from_secs(12));
        assert_eq!(page.suggested_interval, Duration::from_secs(12));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            ResolveError::NotLive.to_string(),
            "Stream is not live or has no active chat"
        );
        assert_eq!(
            FetchError::Transient("timeout".to_string()).to_string(),
            "Transient fetch error: timeout"
        );
    }
}

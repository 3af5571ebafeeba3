//! Mailbox provider trait definition.
//!
//! This module defines the [`MailboxProvider`] trait, the only surface the
//! labeling engine uses to talk to a mailbox. Label identifiers are opaque to
//! the engine; it resolves them by name through the per-run label cache.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{LabelId, MailboxLabel, ThreadContext, ThreadId};

/// Result type alias for mailbox provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during mailbox provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error, including timeouts.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// One page of thread ids from a thread search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadPage {
    pub thread_ids: Vec<ThreadId>,
    /// Opaque cursor for the next page, if there is one.
    pub next_page_token: Option<String>,
}

/// Trait for mailbox backends.
///
/// Implementations own transport and authentication. Every call is a single
/// remote round trip as far as the engine is concerned; retries, if any,
/// belong to the implementation.
#[async_trait]
pub trait MailboxProvider: Send + Sync {
    /// Lists every label in the mailbox, system labels included.
    async fn list_labels(&self) -> Result<Vec<MailboxLabel>>;

    /// Creates a user label and returns its id.
    async fn create_label(&self, name: &str) -> Result<LabelId>;

    /// Lists thread ids matching a search query.
    ///
    /// # Arguments
    ///
    /// * `query` - Provider search expression (e.g. `newer_than:14d`)
    /// * `page_token` - Cursor returned by the previous page
    async fn list_threads(&self, query: &str, page_token: Option<&str>) -> Result<ThreadPage>;

    /// Fetches a thread with all its messages.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotFound`] if the thread does not exist.
    async fn get_thread(&self, thread_id: &ThreadId) -> Result<ThreadContext>;

    /// Adds and removes labels on every message of a thread in one call.
    async fn modify_thread_labels(
        &self,
        thread_id: &ThreadId,
        add: &[LabelId],
        remove: &[LabelId],
    ) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_page_default() {
        let page = ThreadPage::default();
        assert!(page.thread_ids.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn provider_error_display() {
        let auth_err = ProviderError::Authentication("token expired".to_string());
        assert_eq!(auth_err.to_string(), "authentication failed: token expired");

        let rate_err = ProviderError::RateLimited {
            retry_after_secs: Some(60),
        };
        assert!(rate_err.to_string().contains("rate limit"));

        let not_found = ProviderError::NotFound("thread-123".to_string());
        assert!(not_found.to_string().contains("not found"));
    }
}

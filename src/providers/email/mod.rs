//! Mailbox provider implementations.
//!
//! This module contains the [`MailboxProvider`] trait and the Gmail
//! implementation:
//!
//! - [`GmailProvider`] - Gmail API with OAuth 2.0 refresh tokens
//!
//! # Architecture
//!
//! The labeling engine only ever sees the trait. Each provider handles:
//!
//! - Authentication and token refresh
//! - Label listing and creation
//! - Thread search and retrieval
//! - Atomic label modification on a whole thread
//!
//! # Example
//!
//! ```ignore
//! use labeler::providers::email::{GmailCredentials, GmailProvider, MailboxProvider};
//!
//! async fn recent(provider: &dyn MailboxProvider) {
//!     let page = provider
//!         .list_threads("newer_than:14d", None)
//!         .await
//!         .expect("failed to list threads");
//!
//!     for id in page.thread_ids {
//!         println!("{}", id);
//!     }
//! }
//! ```

mod gmail;
mod traits;

pub use gmail::{GmailCredentials, GmailProvider};
pub use traits::{MailboxProvider, ProviderError, Result, ThreadPage};

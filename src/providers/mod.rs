//! Mailbox and AI provider implementations.
//!
//! This module contains provider traits and implementations for external services:
//!
//! - [`email`] - Mailbox providers (Gmail API)
//! - [`ai`] - AI/LLM providers (Gemini, OpenAI-compatible, Anthropic)

pub mod ai;
pub mod email;

use std::time::Duration;

/// Builds the shared HTTP client. Every request made through it times out
/// after `timeout`.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("margin-labeler/", env!("CARGO_PKG_VERSION")))
        .build()
}

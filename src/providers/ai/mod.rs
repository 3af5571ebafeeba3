//! AI/LLM provider implementations.
//!
//! This module provides a unified interface for interacting with various LLM providers.
//!
//! # Supported Providers
//!
//! - **Gemini**: Google's Gemini models (the default backend)
//! - **OpenAI-compatible**: Works with OpenAI, Ollama, vLLM, LM Studio, and other compatible endpoints
//! - **Anthropic**: Claude models via Anthropic's API
//!
//! # Example
//!
//! ```rust,no_run
//! use labeler::providers::ai::{GeminiProvider, LlmProvider, DEFAULT_GEMINI_MODEL};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let gemini = GeminiProvider::new("api-key", DEFAULT_GEMINI_MODEL);
//!
//! let text = gemini
//!     .generate("Return only JSON.", "Classify this thread: ...")
//!     .await?;
//! println!("Response: {}", text);
//! # Ok(())
//! # }
//! ```

mod anthropic;
mod gemini;
mod openai;
mod traits;

use std::sync::Arc;

pub use anthropic::{AnthropicProvider, DEFAULT_ANTHROPIC_MODEL};
pub use gemini::{GeminiProvider, DEFAULT_GEMINI_MODEL};
pub use openai::{
    OpenAiCompatibleProvider, DEFAULT_OLLAMA_MODEL, DEFAULT_OPENAI_MODEL, OLLAMA_BASE_URL,
    OPENAI_BASE_URL,
};
pub use traits::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, LlmResult, Usage,
    CLASSIFY_TEMPERATURE,
};

use crate::config::{AiSettings, LlmBackend};

/// Builds the configured LLM provider on top of `client`.
///
/// Settings loading guarantees a key for every backend that needs one; a
/// missing key here is sent as an empty credential and rejected remotely.
pub fn build_provider(settings: &AiSettings, client: reqwest::Client) -> Arc<dyn LlmProvider> {
    let api_key = settings.api_key.clone().unwrap_or_default();
    let model = settings.model.clone();

    let provider: Arc<dyn LlmProvider> = match settings.provider {
        LlmBackend::Gemini => {
            let mut p = GeminiProvider::new(api_key, model).with_client(client);
            if let Some(url) = &settings.base_url {
                p = p.with_base_url(url.as_str());
            }
            Arc::new(p)
        }
        LlmBackend::Anthropic => {
            let mut p = AnthropicProvider::new(api_key, model).with_client(client);
            if let Some(url) = &settings.base_url {
                p = p.with_base_url(url.as_str());
            }
            Arc::new(p)
        }
        LlmBackend::OpenAi => {
            let base_url = settings.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
            Arc::new(
                OpenAiCompatibleProvider::custom(base_url, Some(api_key), model)
                    .with_client(client),
            )
        }
        LlmBackend::Ollama => {
            let base_url = settings.base_url.as_deref().unwrap_or(OLLAMA_BASE_URL);
            Arc::new(
                OpenAiCompatibleProvider::custom(base_url, settings.api_key.clone(), model)
                    .with_client(client),
            )
        }
    };

    tracing::info!(
        provider = provider.name(),
        model = provider.model(),
        "LLM provider configured"
    );
    provider
}

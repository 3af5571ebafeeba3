//! The seam between the classifier and the configured LLM backend.

use async_trait::async_trait;
use thiserror::Error;

/// Sampling temperature for classification calls.
pub const CLASSIFY_TEMPERATURE: f32 = 0.1;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("LLM returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unreadable LLM response: {0}")]
    InvalidResponse(String),

    #[error("LLM rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("LLM rejected the credentials: {0}")]
    Unauthorized(String),

    #[error("LLM withheld the answer: {0}")]
    Blocked(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// One system prompt and one user prompt, answered with a JSON object
/// wherever the backend can enforce that.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub temperature: f32,
    /// Backend default when unset.
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: CLASSIFY_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// How the backend says generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Complete,
    /// Cut off at the token limit.
    Truncated,
    /// Withheld by a safety or policy filter.
    Filtered,
    Other,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: Usage,
    pub finish_reason: FinishReason,
}

/// A backend that answers one prompt pair at a time.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse>;

    /// Sends `system` and `user` and returns the raw reply text.
    ///
    /// A filtered reply is an error, since its text is not an answer.
    async fn generate(&self, system: &str, user: &str) -> LlmResult<String> {
        let response = self.complete(&CompletionRequest::new(system, user)).await?;

        tracing::debug!(
            provider = self.name(),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            finish_reason = ?response.finish_reason,
            "LLM call finished"
        );

        match response.finish_reason {
            FinishReason::Filtered => Err(LlmError::Blocked(format!(
                "{} withheld the response",
                self.name()
            ))),
            _ => Ok(response.text),
        }
    }
}

/// Maps a non-success reply to an [`LlmError`].
///
/// `detail` pulls the backend's message out of the error body and reports
/// whether that message names a credential problem.
pub(super) async fn error_from_response(
    response: reqwest::Response,
    detail: fn(&str) -> Option<(String, bool)>,
) -> LlmError {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        return LlmError::RateLimited { retry_after_secs };
    }

    let body = response.text().await.unwrap_or_default();
    let (message, bad_credentials) =
        detail(&body).unwrap_or_else(|| (format!("HTTP {status}"), false));

    if bad_credentials || status == 401 || status == 403 {
        LlmError::Unauthorized(message)
    } else {
        LlmError::Api { status, message }
    }
}

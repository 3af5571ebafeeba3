//! Anthropic Messages API.
//!
//! There is no JSON response mode here, so the system prompt alone asks for
//! JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::openai::ChatMessage;
use super::traits::{
    error_from_response, CompletionRequest, CompletionResponse, FinishReason, LlmError,
    LlmProvider, LlmResult, Usage,
};

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-haiku-latest";

/// `max_tokens` is mandatory on this API.
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: TokenCounts,
}

/// Content blocks other than text (tool use, thinking) carry no `text`.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenCounts {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Points the provider at a different API root (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            system: &request.system_prompt,
            messages: [ChatMessage {
                role: "user",
                content: &request.user_prompt,
            }],
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature,
        }
    }

    fn finish_reason(reason: Option<&str>) -> FinishReason {
        match reason {
            Some("end_turn" | "stop_sequence") => FinishReason::Complete,
            Some("max_tokens") => FinishReason::Truncated,
            Some("refusal") => FinishReason::Filtered,
            _ => FinishReason::Other,
        }
    }

    fn error_detail(body: &str) -> Option<(String, bool)> {
        let detail = serde_json::from_str::<ErrorBody>(body).ok()?.error;
        let bad_key = detail.kind == "authentication_error";
        Some((detail.message, bad_key))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_request(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, Self::error_detail).await);
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(CompletionResponse {
            text: body.content.into_iter().filter_map(|b| b.text).collect(),
            usage: Usage {
                input_tokens: body.usage.input_tokens,
                output_tokens: body.usage.output_tokens,
            },
            finish_reason: Self::finish_reason(body.stop_reason.as_deref()),
        })
    }
}

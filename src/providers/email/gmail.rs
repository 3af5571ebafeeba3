//! Gmail API provider implementation.
//!
//! This module provides a [`MailboxProvider`] implementation using the Gmail
//! REST API.
//!
//! # Authentication
//!
//! Gmail uses OAuth 2.0. The provider is given a long-lived refresh token and
//! exchanges it for short-lived access tokens on demand, refreshing shortly
//! before expiry so a long-running scheduler never holds a stale token.
//!
//! # API Usage
//!
//! This provider uses the Gmail API v1:
//! - `users.labels.list` / `users.labels.create` for the taxonomy labels
//! - `users.threads.list` for candidate discovery
//! - `users.threads.get` for complete threads
//! - `users.threads.modify` for label changes

use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{MailboxProvider, ProviderError, Result, ThreadPage};
use crate::domain::{LabelId, MailboxLabel, ThreadContext, ThreadId, ThreadMessage};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Refresh access tokens this long before Google says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Longest body excerpt handed to the classifier, in characters.
const BODY_EXCERPT_CHARS: usize = 1000;

/// Gmail encodes bodies as URL-safe base64, with or without padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Gmail API thread list response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadListResponse {
    threads: Option<Vec<ThreadRef>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadRef {
    id: String,
}

/// Gmail API thread.
#[derive(Debug, Deserialize)]
struct GmailThread {
    id: String,
    messages: Option<Vec<GmailMessage>>,
}

/// Gmail API message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    label_ids: Option<Vec<String>>,
    snippet: Option<String>,
    payload: Option<GmailMessagePayload>,
}

/// Gmail message payload (headers and body parts).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessagePayload {
    mime_type: Option<String>,
    headers: Option<Vec<GmailHeader>>,
    parts: Option<Vec<GmailPart>>,
    body: Option<GmailBody>,
}

/// Gmail message header.
#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

/// Gmail message part (for multipart messages).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    mime_type: Option<String>,
    body: Option<GmailBody>,
    parts: Option<Vec<GmailPart>>,
}

/// Gmail message body.
#[derive(Debug, Deserialize)]
struct GmailBody {
    data: Option<String>,
}

/// Gmail API label.
#[derive(Debug, Deserialize)]
struct GmailLabel {
    id: String,
    name: String,
}

/// Gmail labels list response.
#[derive(Debug, Deserialize)]
struct LabelsListResponse {
    labels: Option<Vec<GmailLabel>>,
}

/// Gmail label create request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateLabelRequest<'a> {
    name: &'a str,
    label_list_visibility: &'static str,
    message_list_visibility: &'static str,
}

/// Gmail modify request body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    add_label_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remove_label_ids: Vec<String>,
}

/// OAuth token response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// OAuth client credentials plus the user's refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailCredentials {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// OAuth refresh token.
    pub refresh_token: String,
}

#[derive(Debug)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Gmail API provider.
///
/// # Example
///
/// ```ignore
/// use labeler::providers::email::{GmailCredentials, GmailProvider, MailboxProvider};
///
/// let provider = GmailProvider::new(credentials);
/// let labels = provider.list_labels().await?;
/// ```
pub struct GmailProvider {
    /// HTTP client for API requests.
    client: reqwest::Client,
    /// Base URL of the `users/me` resource.
    api_base: String,
    /// OAuth token endpoint.
    token_url: String,
    /// OAuth credentials.
    credentials: GmailCredentials,
    /// Current access token; refreshed as needed.
    token: Mutex<Option<AccessToken>>,
}

impl GmailProvider {
    /// Creates a provider for the mailbox the refresh token belongs to.
    ///
    /// No request is made until the first API call.
    pub fn new(credentials: GmailCredentials) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: GMAIL_API_BASE.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Overrides the HTTP client (timeouts, proxies).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Points the provider at different API and token endpoints.
    pub fn with_endpoints(
        mut self,
        api_base: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.token_url = token_url.into();
        self
    }

    /// Exchanges the refresh token for an access token now.
    ///
    /// API calls do this lazily; calling it up front surfaces bad credentials
    /// before any work starts.
    pub async fn authenticate(&self) -> Result<()> {
        self.access_token().await.map(|_| ())
    }

    /// Returns a valid access token, refreshing it if missing or about to expire.
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;

        if let Some(current) = token.as_ref() {
            if current.expires_at > Instant::now() + TOKEN_REFRESH_MARGIN {
                return Ok(current.value.clone());
            }
        }

        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(format!(
                "token refresh failed ({}): {}",
                status, body
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse token response: {}", e)))?;

        tracing::debug!(expires_in = token_response.expires_in, "Gmail access token refreshed");

        let value = token_response.access_token;
        *token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(token_response.expires_in),
        });
        Ok(value)
    }

    /// Builds authorization headers for API requests.
    async fn auth_headers(&self) -> Result<HeaderMap> {
        let token = self.access_token().await?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ProviderError::Internal(format!("invalid header: {}", e)))?,
        );
        Ok(headers)
    }

    /// Makes an authenticated GET request to the Gmail API.
    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let url = format!("{}{}", self.api_base, endpoint);
        let headers = self.auth_headers().await?;

        let response = self
            .client
            .get(&url)
            .headers(headers)
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        self.handle_response(response).await
    }

    /// Makes an authenticated POST request to the Gmail API.
    async fn post<T: for<'de> Deserialize<'de>, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.send_post(endpoint, body).await?;
        self.handle_response(response).await
    }

    /// Makes an authenticated POST request and discards the response body.
    async fn post_no_response<B: Serialize>(&self, endpoint: &str, body: &B) -> Result<()> {
        let response = self.send_post(endpoint, body).await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        Ok(())
    }

    async fn send_post<B: Serialize>(&self, endpoint: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.api_base, endpoint);
        let headers = self.auth_headers().await?;

        self.client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Connection(e.to_string()))
    }

    /// Handles API response, checking for errors.
    async fn handle_response<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Internal(format!("parse response: {}", e)))
    }

    /// Handles API error responses.
    async fn handle_error(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status();
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let body = response.text().await.unwrap_or_default();

        match status.as_u16() {
            400 | 409 => ProviderError::InvalidRequest(body),
            401 | 403 => ProviderError::Authentication(format!("unauthorized: {}", body)),
            404 => ProviderError::NotFound(body),
            429 => ProviderError::RateLimited { retry_after_secs },
            _ => ProviderError::Internal(format!("API error ({}): {}", status, body)),
        }
    }

    /// Finds a header value by case-insensitive name.
    fn header<'a>(payload: Option<&'a GmailMessagePayload>, name: &str) -> Option<&'a str> {
        payload
            .and_then(|p| p.headers.as_ref())
            .and_then(|h| h.iter().find(|hdr| hdr.name.eq_ignore_ascii_case(name)))
            .map(|hdr| hdr.value.as_str())
    }

    fn decode_body(body: Option<&GmailBody>) -> Option<String> {
        let data = body?.data.as_ref()?;
        let decoded = BODY_ENGINE.decode(data).ok()?;
        String::from_utf8(decoded).ok()
    }

    /// Extracts the first `text/plain` body of a message.
    fn extract_text(payload: &GmailMessagePayload) -> Option<String> {
        let is_plain = payload
            .mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("text/plain"));
        if is_plain {
            if let Some(text) = Self::decode_body(payload.body.as_ref()) {
                return Some(text);
            }
        }
        payload
            .parts
            .as_deref()
            .and_then(Self::extract_text_from_parts)
    }

    /// Recursively searches multipart bodies for plain text.
    fn extract_text_from_parts(parts: &[GmailPart]) -> Option<String> {
        for part in parts {
            if part.mime_type.as_deref() == Some("text/plain") {
                if let Some(text) = Self::decode_body(part.body.as_ref()) {
                    return Some(text);
                }
            }
            if let Some(text) = part
                .parts
                .as_deref()
                .and_then(Self::extract_text_from_parts)
            {
                return Some(text);
            }
        }
        None
    }

    /// Body excerpt for the classifier: plain text if present, else the snippet.
    fn body_excerpt(msg: &GmailMessage) -> String {
        let text = msg
            .payload
            .as_ref()
            .and_then(Self::extract_text)
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| msg.snippet.clone().unwrap_or_default());

        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.chars().take(BODY_EXCERPT_CHARS).collect()
    }

    /// Converts a Gmail thread to the engine's thread snapshot.
    fn to_thread_context(thread: GmailThread) -> ThreadContext {
        let gmail_messages = thread.messages.unwrap_or_default();

        let subject = gmail_messages
            .first()
            .and_then(|m| Self::header(m.payload.as_ref(), "Subject"))
            .unwrap_or("No Subject")
            .to_string();

        let messages = gmail_messages
            .iter()
            .map(|m| ThreadMessage {
                sender: Self::header(m.payload.as_ref(), "From")
                    .unwrap_or("Unknown")
                    .to_string(),
                timestamp: Self::header(m.payload.as_ref(), "Date")
                    .unwrap_or("Unknown")
                    .to_string(),
                label_ids: m
                    .label_ids
                    .iter()
                    .flatten()
                    .map(|l| LabelId::from(l.as_str()))
                    .collect(),
                body_excerpt: Self::body_excerpt(m),
            })
            .collect();

        ThreadContext::new(ThreadId::from(thread.id), subject, messages)
    }
}

#[async_trait]
impl MailboxProvider for GmailProvider {
    async fn list_labels(&self) -> Result<Vec<MailboxLabel>> {
        let response: LabelsListResponse = self.get("/labels", &[]).await?;

        Ok(response
            .labels
            .unwrap_or_default()
            .into_iter()
            .map(|l| MailboxLabel::new(l.id, l.name))
            .collect())
    }

    async fn create_label(&self, name: &str) -> Result<LabelId> {
        let body = CreateLabelRequest {
            name,
            label_list_visibility: "labelShow",
            message_list_visibility: "show",
        };
        let created: GmailLabel = self.post("/labels", &body).await?;

        tracing::info!(label = %created.name, id = %created.id, "Created Gmail label");
        Ok(LabelId::from(created.id))
    }

    async fn list_threads(&self, query: &str, page_token: Option<&str>) -> Result<ThreadPage> {
        let mut params = vec![("q", query)];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let response: ThreadListResponse = self.get("/threads", &params).await?;

        Ok(ThreadPage {
            thread_ids: response
                .threads
                .unwrap_or_default()
                .into_iter()
                .map(|t| ThreadId::from(t.id))
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn get_thread(&self, thread_id: &ThreadId) -> Result<ThreadContext> {
        let endpoint = format!("/threads/{}", thread_id);
        let thread: GmailThread = self.get(&endpoint, &[("format", "full")]).await?;
        Ok(Self::to_thread_context(thread))
    }

    async fn modify_thread_labels(
        &self,
        thread_id: &ThreadId,
        add: &[LabelId],
        remove: &[LabelId],
    ) -> Result<()> {
        let endpoint = format!("/threads/{}/modify", thread_id);
        let body = ModifyRequest {
            add_label_ids: add.iter().map(|l| l.0.clone()).collect(),
            remove_label_ids: remove.iter().map(|l| l.0.clone()).collect(),
        };
        self.post_no_response(&endpoint, &body).await
    }
}

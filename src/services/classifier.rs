//! Thread classification against the label taxonomy.
//!
//! The [`Classifier`] renders a thread into a prompt, sends one request to the
//! configured [`LlmProvider`], and turns the reply into a validated
//! [`Classification`]. Nothing is retried: a bad reply is that thread's error.

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{Category, Classification, Taxonomy, ThreadContext, ValidationError};
use crate::providers::ai::{LlmError, LlmProvider};

/// Errors that can occur while classifying a thread.
#[derive(Debug, Error)]
pub enum ClassificationError {
    /// The reply was not a JSON object of the expected shape.
    #[error("malformed classification: {0}")]
    Parse(#[from] serde_json::Error),

    /// The reply used a value outside the taxonomy.
    #[error("invalid classification: {0}")]
    Validation(#[from] ValidationError),

    /// The LLM call itself failed.
    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),
}

/// Result type for classification.
pub type Result<T> = std::result::Result<T, ClassificationError>;

const SYSTEM_PREAMBLE: &str = "\
You are an email classification assistant for an e-commerce store management team.
You analyze email threads and classify them using a predefined label taxonomy.

You must return ONLY valid JSON. No explanation, no markdown, no preamble.";

const SYSTEM_RULES: &str = "\
Rules:
- Read ALL messages in the thread before deciding
- If the last message is from us (the store), set status to Waiting-for-reply
- If the thread shows resolution or a closed matter, set status to Closed
- If there are signs of legal threats, aggression, or overdue financial demands, set priority to Urgent
- For FINANCE emails, always set an appropriate FINANCE value; otherwise set finance to null
- ACTION Prepare-reply means the draft agent will write a response
- ACTION Escalate means a human must handle this; never combine it with Prepare-reply
- Use values exactly as listed, without the category prefix";

/// Renders the system prompt for a taxonomy.
pub fn build_system_prompt(taxonomy: &Taxonomy) -> String {
    let one_of = |category: Category| taxonomy.values(category).join(" | ");

    format!(
        "{preamble}

Your output must follow this exact schema:
{{
  \"status\": \"<one of: {status}>\",
  \"type\": \"<one of: {kind}>\",
  \"finance\": \"<one of: {finance}>\" or null,
  \"action\": \"<one of: {action}>\",
  \"priority\": \"<one of: {priority}>\",
  \"reason\": \"<brief English explanation of classification decisions, max 2 sentences>\"
}}

{rules}
",
        preamble = SYSTEM_PREAMBLE,
        status = one_of(Category::Status),
        kind = one_of(Category::Type),
        finance = one_of(Category::Finance),
        action = one_of(Category::Action),
        priority = one_of(Category::Priority),
        rules = SYSTEM_RULES,
    )
}

/// Renders a thread as the user prompt, messages in chronological order.
pub fn build_user_prompt(thread: &ThreadContext) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Classify the following email thread:\n");
    let _ = writeln!(prompt, "Subject: {}", thread.subject);
    let _ = writeln!(prompt, "Number of messages: {}", thread.messages.len());
    let _ = writeln!(
        prompt,
        "Last message from: {}",
        if thread.last_message_from_us() {
            "us"
        } else {
            "them"
        }
    );
    let _ = writeln!(prompt, "\n--- THREAD START ---");
    for msg in &thread.messages {
        let _ = writeln!(prompt, "[MSG {} - FROM: {}]", msg.timestamp, msg.sender);
        let _ = writeln!(prompt, "{}\n", msg.body_excerpt);
    }
    let _ = writeln!(prompt, "--- THREAD END ---\n");
    prompt.push_str("Return only JSON.");
    prompt
}

/// Removes a surrounding Markdown code fence (```` ```json ```` or bare
/// ```` ``` ````), if any.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Parses a raw reply into a [`Classification`] without validating values.
pub fn parse_response(raw: &str) -> Result<Classification> {
    Ok(serde_json::from_str(strip_code_fence(raw))?)
}

/// Classifies threads with one LLM call each.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    taxonomy: Arc<Taxonomy>,
    system_prompt: String,
}

impl Classifier {
    /// Creates a classifier; the system prompt is rendered once here.
    pub fn new(llm: Arc<dyn LlmProvider>, taxonomy: Arc<Taxonomy>) -> Self {
        let system_prompt = build_system_prompt(&taxonomy);
        Self {
            llm,
            taxonomy,
            system_prompt,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Classifies one thread.
    ///
    /// # Errors
    ///
    /// - [`ClassificationError::Llm`] if the request fails
    /// - [`ClassificationError::Parse`] if the reply is not the expected JSON object
    /// - [`ClassificationError::Validation`] if a value is outside the taxonomy
    pub async fn classify(&self, thread: &ThreadContext) -> Result<Classification> {
        let user_prompt = build_user_prompt(thread);
        let raw = self.llm.generate(&self.system_prompt, &user_prompt).await?;

        let classification = parse_response(&raw).map_err(|e| {
            tracing::debug!(thread_id = %thread.id, raw = %raw, "Unparsable classifier reply");
            e
        })?;
        self.taxonomy.validate(&classification)?;

        tracing::debug!(
            thread_id = %thread.id,
            status = %classification.status,
            kind = %classification.kind,
            action = %classification.action,
            "Thread classified"
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LabelId, ThreadId, ThreadMessage};
    use crate::providers::ai::{
        CompletionRequest, CompletionResponse, FinishReason, LlmResult, Usage,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// LLM fake that returns a canned reply and records prompts.
    struct CannedLlm {
        reply: LlmResult<String>,
        prompts: Mutex<Vec<CompletionRequest>>,
    }

    impl CannedLlm {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(LlmError::Api {
                    status: 503,
                    message: "overloaded".to_string(),
                }),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedLlm {
        fn name(&self) -> &str {
            "canned"
        }

        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
            self.prompts.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(text) => Ok(CompletionResponse {
                    text: text.clone(),
                    usage: Usage::default(),
                    finish_reason: FinishReason::Complete,
                }),
                Err(e) => Err(LlmError::InvalidResponse(e.to_string())),
            }
        }
    }

    fn thread() -> ThreadContext {
        ThreadContext::new(
            ThreadId::from("t-1"),
            "Order #1001 missing",
            vec![
                ThreadMessage {
                    sender: "Jana <jana@example.com>".to_string(),
                    timestamp: "Mon, 6 Jan 2025 10:00:00 +0100".to_string(),
                    label_ids: vec![LabelId::from("INBOX")],
                    body_excerpt: "My order has not arrived.".to_string(),
                },
                ThreadMessage {
                    sender: "shop@example.com".to_string(),
                    timestamp: "Mon, 6 Jan 2025 12:00:00 +0100".to_string(),
                    label_ids: vec![LabelId::from("SENT")],
                    body_excerpt: "We are checking with the carrier.".to_string(),
                },
            ],
        )
    }

    fn classifier(llm: CannedLlm) -> (Classifier, Arc<CannedLlm>) {
        let llm = Arc::new(llm);
        let classifier = Classifier::new(llm.clone(), Arc::new(Taxonomy::builtin()));
        (classifier, llm)
    }

    const VALID: &str = r#"{"status":"Waiting-for-reply","type":"Shipping","finance":null,
        "action":"No-action","priority":"Normal","reason":"We replied last."}"#;

    #[test]
    fn system_prompt_lists_taxonomy_values() {
        let prompt = build_system_prompt(&Taxonomy::builtin());
        assert!(prompt.contains("New | Processed | Waiting-for-reply | Closed"));
        assert!(prompt.contains("Invoice-incoming | Invoice-overdue"));
        assert!(prompt.contains("Urgent | Normal | Low"));
        assert!(prompt.contains("return ONLY valid JSON"));
        assert!(!prompt.contains("DRAFT"));
    }

    #[test]
    fn user_prompt_renders_messages_in_order() {
        let prompt = build_user_prompt(&thread());
        assert!(prompt.contains("Subject: Order #1001 missing"));
        assert!(prompt.contains("Number of messages: 2"));
        assert!(prompt.contains("Last message from: us"));

        let first = prompt.find("My order has not arrived.").unwrap();
        let second = prompt.find("We are checking with the carrier.").unwrap();
        assert!(first < second);
        assert!(prompt
            .contains("[MSG Mon, 6 Jan 2025 10:00:00 +0100 - FROM: Jana <jana@example.com>]"));
    }

    #[test]
    fn strip_code_fence_variants() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1}  "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json{\"a\":1}"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn classifies_valid_reply() {
        let (classifier, llm) = classifier(CannedLlm::replying(VALID));

        let c = classifier.classify(&thread()).await.unwrap();
        assert_eq!(c.status, "Waiting-for-reply");
        assert_eq!(c.kind, "Shipping");
        assert!(c.finance.is_none());

        let prompts = llm.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].system_prompt, classifier.system_prompt());
        assert_eq!(prompts[0].user_prompt, build_user_prompt(&thread()));
    }

    #[tokio::test]
    async fn fenced_reply_parses() {
        let fenced = format!("```json\n{}\n```", VALID);
        let (classifier, _) = classifier(CannedLlm::replying(&fenced));
        assert!(classifier.classify(&thread()).await.is_ok());
    }

    #[tokio::test]
    async fn bogus_value_is_validation_error() {
        let reply = r#"{"status":"Bogus","type":"Order","finance":null,
            "action":"No-action","priority":"Low","reason":"?"}"#;
        let (classifier, _) = classifier(CannedLlm::replying(reply));

        let err = classifier.classify(&thread()).await.unwrap_err();
        assert!(matches!(
            err,
            ClassificationError::Validation(ValidationError::UnknownValue {
                category: Category::Status,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn prefixed_value_is_not_repaired() {
        let reply = r#"{"status":"STATUS/New","type":"Order","finance":null,
            "action":"No-action","priority":"Low","reason":"x"}"#;
        let (classifier, _) = classifier(CannedLlm::replying(reply));

        let err = classifier.classify(&thread()).await.unwrap_err();
        assert!(matches!(err, ClassificationError::Validation(_)));
    }

    #[tokio::test]
    async fn prose_reply_is_parse_error() {
        let (classifier, _) = classifier(CannedLlm::replying("I think this is an order."));
        let err = classifier.classify(&thread()).await.unwrap_err();
        assert!(matches!(err, ClassificationError::Parse(_)));
    }

    #[tokio::test]
    async fn omitted_finance_is_parse_error() {
        let reply = r#"{"status":"New","type":"Order","action":"No-action",
            "priority":"Low","reason":"x"}"#;
        let (classifier, _) = classifier(CannedLlm::replying(reply));

        let err = classifier.classify(&thread()).await.unwrap_err();
        assert!(matches!(err, ClassificationError::Parse(_)));
    }

    #[tokio::test]
    async fn transport_failure_is_llm_error() {
        let (classifier, _) = classifier(CannedLlm::failing());
        let err = classifier.classify(&thread()).await.unwrap_err();
        assert!(matches!(err, ClassificationError::Llm(_)));
    }
}

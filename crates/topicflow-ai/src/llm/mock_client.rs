//! Deterministic mock LLM client for tests and offline runs.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep};

use crate::error::{AiError, Result};

use super::{CompletionRequest, CompletionResponse, FinishReason, LlmClient, Role, TokenUsage};

/// Deterministic step for scripted mock completions.
#[derive(Debug, Clone)]
pub enum MockStepKind {
    /// Return a plain assistant message.
    Text(String),
    /// Return an LLM error.
    Error(String),
    /// Return a timeout-like error after optional delay.
    Timeout,
}

/// Scripted completion step with optional delay.
#[derive(Debug, Clone)]
pub struct MockStep {
    pub delay_ms: u64,
    pub kind: MockStepKind,
}

impl MockStep {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Text(content.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delay_ms: 0,
            kind: MockStepKind::Error(message.into()),
        }
    }

    pub fn timeout(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            kind: MockStepKind::Timeout,
        }
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }
}

/// A deterministic mock LLM client driven by scripted steps.
///
/// Every request is recorded so tests can assert on the prompts that were
/// sent. Once the script runs dry the client echoes the last user message,
/// unless it was built with [`MockLlmClient::strict`].
#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    model: String,
    strict: bool,
    script: Arc<Mutex<VecDeque<MockStep>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    served: Arc<Mutex<usize>>,
}

impl MockLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn from_steps(model: impl Into<String>, steps: Vec<MockStep>) -> Self {
        Self {
            model: model.into(),
            script: Arc::new(Mutex::new(VecDeque::from(steps))),
            ..Self::default()
        }
    }

    /// Build a client from plain text replies.
    pub fn from_replies<I, T>(model: impl Into<String>, replies: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let steps = replies.into_iter().map(MockStep::text).collect();
        Self::from_steps(model, steps)
    }

    /// Fail with [`AiError::ScriptExhausted`] instead of echoing once the
    /// script is consumed.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub async fn push_step(&self, step: MockStep) {
        self.script.lock().await.push_back(step);
    }

    /// Number of scripted steps not yet consumed.
    pub async fn remaining(&self) -> usize {
        self.script.lock().await.len()
    }

    /// All requests received so far, oldest first.
    pub async fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    async fn next_step(&self) -> Option<MockStep> {
        self.script.lock().await.pop_front()
    }

    fn usage_for(content_len: usize) -> TokenUsage {
        let completion_tokens = content_len as u32;
        TokenUsage {
            prompt_tokens: 1,
            completion_tokens,
            total_tokens: 1 + completion_tokens,
        }
    }

    fn fallback_response(request: &CompletionRequest) -> CompletionResponse {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|msg| matches!(msg.role, Role::User))
            .map(|msg| format!("mock-echo: {}", msg.content))
            .unwrap_or_else(|| "mock-ok".to_string());

        CompletionResponse {
            usage: Some(Self::usage_for(text.len())),
            content: Some(text),
            finish_reason: FinishReason::Stop,
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn provider(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().await.push(request.clone());

        let Some(step) = self.next_step().await else {
            if self.strict {
                return Err(AiError::ScriptExhausted(*self.served.lock().await));
            }
            return Ok(Self::fallback_response(&request));
        };
        *self.served.lock().await += 1;

        if step.delay_ms > 0 {
            sleep(Duration::from_millis(step.delay_ms)).await;
        }

        match step.kind {
            MockStepKind::Text(content) => Ok(CompletionResponse {
                usage: Some(Self::usage_for(content.len())),
                content: Some(content),
                finish_reason: FinishReason::Stop,
            }),
            MockStepKind::Error(message) => Err(AiError::Llm(message)),
            MockStepKind::Timeout => Err(AiError::Llm("mock timeout".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Message, invoke};

    #[tokio::test]
    async fn mock_client_returns_scripted_text() {
        let client = MockLlmClient::from_steps("mock-model", vec![MockStep::text("hello")]);

        let response = client
            .complete(CompletionRequest::new(vec![Message::user("ping")]))
            .await
            .expect("mock response should succeed");

        assert_eq!(response.content.as_deref(), Some("hello"));
        assert_eq!(response.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn mock_client_echoes_when_script_is_empty() {
        let client = MockLlmClient::new("mock-model");

        let text = invoke(&client, vec![Message::user("ping")])
            .await
            .expect("fallback should succeed");

        assert_eq!(text, "mock-echo: ping");
    }

    #[tokio::test]
    async fn strict_mock_client_fails_when_script_is_empty() {
        let client = MockLlmClient::from_replies("mock-model", ["only"]).strict();

        invoke(&client, vec![Message::user("one")]).await.unwrap();
        let err = invoke(&client, vec![Message::user("two")])
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::ScriptExhausted(1)));
    }

    #[tokio::test]
    async fn mock_client_records_requests() {
        let client = MockLlmClient::from_replies("mock-model", ["a", "b"]);

        invoke(&client, vec![Message::system("first")]).await.unwrap();
        invoke(&client, vec![Message::user("second")]).await.unwrap();

        let requests = client.recorded_requests().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].messages[0].content, "first");
        assert_eq!(requests[1].messages[0].role, Role::User);
        assert_eq!(client.remaining().await, 0);
    }

    #[tokio::test]
    async fn mock_client_surfaces_scripted_errors() {
        let client = MockLlmClient::from_steps(
            "mock-model",
            vec![MockStep::error("rate limit"), MockStep::timeout(0)],
        );

        let first = invoke(&client, vec![Message::user("x")]).await.unwrap_err();
        assert!(first.is_retryable());

        let second = invoke(&client, vec![Message::user("x")]).await.unwrap_err();
        assert!(matches!(second, AiError::Llm(ref m) if m == "mock timeout"));
    }
}

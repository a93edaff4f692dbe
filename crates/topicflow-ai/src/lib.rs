//! TopicFlow AI - language-model invocation layer
//!
//! This crate provides:
//! - The `LlmClient` capability injected into decision nodes and handlers
//! - An OpenAI-compatible chat-completions client
//! - A deterministic scripted client for tests and offline runs

pub mod error;
mod http_client;
pub mod llm;

// Re-export commonly used types
pub use error::{AiError, Result};
pub use llm::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, MockLlmClient,
    MockStep, MockStepKind, OpenAIClient, RetryPolicy, Role, TokenUsage, invoke,
};

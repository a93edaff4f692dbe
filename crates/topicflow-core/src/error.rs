//! Error types for the orchestration core

use thiserror::Error;
use topicflow_ai::AiError;

use crate::directive::DirectiveFailure;

/// Orchestration error types
///
/// Directive failures are recovered inside the topic manager and never
/// appear here; only the variants below propagate to a turn's caller.
#[derive(Error, Debug)]
pub enum FlowError {
    /// The dialogue was touched while no topic was active.
    #[error("State invariant violated: {0}")]
    StateInvariantViolation(String),

    /// A decision node spent its attempt budget without a usable directive.
    #[error("Decision node '{node}' gave up after {attempts} attempts: {last_failure}")]
    RetryExhausted {
        node: String,
        attempts: u32,
        last_failure: DirectiveFailure,
    },

    #[error("Invalid flow configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid graph '{graph}': {reason}")]
    GraphConfig { graph: String, reason: String },

    #[error("Graph '{graph}' routed from '{from}' to undeclared outcome '{route}'")]
    UndeclaredRoute {
        graph: String,
        from: String,
        route: String,
    },

    #[error("Graph '{graph}' exceeded its step limit of {limit}")]
    StepLimitExceeded { graph: String, limit: usize },

    #[error("LLM error: {0}")]
    Llm(#[from] AiError),
}

impl FlowError {
    pub(crate) fn no_active_topic(operation: &str) -> Self {
        FlowError::StateInvariantViolation(format!(
            "{operation} requires an active topic but the topic stack is empty"
        ))
    }
}

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, FlowError>;

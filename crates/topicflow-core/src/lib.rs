//! TopicFlow Core - topic-scoped dialogue orchestration
//!
//! This crate provides:
//! - Conversation state with a topic stack, an archive and a topic-tagged dialogue
//! - A small state-machine graph engine with conditional edges and step limits
//! - The topic manager graph that resolves which topic a message belongs to
//! - The dispatch graph that runs the resolved topic's handler
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use topicflow_ai::OpenAIClient;
//! use topicflow_core::{ConversationState, TurnRunner};
//!
//! let llm = Arc::new(OpenAIClient::new(api_key)?);
//! let runner = TurnRunner::with_defaults(llm)?;
//! let mut state = ConversationState::new();
//! let replies = runner.run_turn(&mut state, "my throat hurts").await?;
//! ```

pub mod config;
pub mod directive;
pub mod dispatch;
pub mod error;
pub mod graph;
pub mod handlers;
mod runner;
pub mod state;
pub mod store;
pub mod topic_manager;
pub mod transcript;

// Re-export commonly used types
pub use config::FlowConfig;
pub use directive::DirectiveFailure;
pub use error::{FlowError, Result};
pub use graph::{CompiledGraph, END, GraphBuilder, GraphState, Node, Outcome, START};
pub use handlers::{ChatHandler, HandlerNode, HandlerSet, StaticReplyHandler};
pub use runner::TurnRunner;
pub use state::{
    AppointmentSlots, ConversationState, DialogueMessage, HandlerKind, ListUpdate,
    RoutingVerdict, StatePatch, Topic, TopicId, TopicSlots,
};

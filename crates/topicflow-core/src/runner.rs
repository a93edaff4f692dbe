use std::sync::Arc;

use topicflow_ai::LlmClient;
use tracing::{debug, info};

use crate::config::FlowConfig;
use crate::dispatch::build_dispatch_graph;
use crate::error::Result;
use crate::graph::CompiledGraph;
use crate::handlers::HandlerSet;
use crate::state::{ConversationState, DialogueMessage, StatePatch};

/// Drives one conversation turn through the dispatch graph.
///
/// A runner holds no per-conversation data, so one instance can serve any
/// number of conversations concurrently.
pub struct TurnRunner {
    graph: CompiledGraph<ConversationState>,
    config: FlowConfig,
}

impl TurnRunner {
    /// Build the dispatch graph for `handlers`; fails on a config whose step
    /// limit would end a turn before a decision node can report exhaustion.
    pub fn new(llm: Arc<dyn LlmClient>, handlers: HandlerSet, config: FlowConfig) -> Result<Self> {
        config.validate()?;
        let graph = build_dispatch_graph(llm, &handlers, &config)?;
        Ok(Self { graph, config })
    }

    /// Runner with the stock handlers and default limits.
    pub fn with_defaults(llm: Arc<dyn LlmClient>) -> Result<Self> {
        let handlers = HandlerSet::defaults(llm.clone());
        Self::new(llm, handlers, FlowConfig::default())
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Process `message` against `state`.
    ///
    /// The turn runs on a copy; `state` is only replaced when the whole turn
    /// succeeds. Returns the messages appended during the turn.
    pub async fn run_turn(
        &self,
        state: &mut ConversationState,
        message: impl Into<String>,
    ) -> Result<Vec<DialogueMessage>> {
        let message = message.into();
        debug!(chars = message.len(), stack = state.topic_stack.len(), "Starting turn");

        let mut working = state.clone();
        working.apply(
            StatePatch::new()
                .with_current_message(message)
                .drain_scratch()
                .clear_verdict()
                .clear_handoff(),
        );

        let before = working.dialogue.len();
        let finished = self.graph.invoke(working).await?;
        let appended = finished.dialogue[before..].to_vec();

        info!(
            appended = appended.len(),
            stack = finished.topic_stack.len(),
            archived = finished.archive.len(),
            "Turn complete"
        );
        *state = finished;
        Ok(appended)
    }
}

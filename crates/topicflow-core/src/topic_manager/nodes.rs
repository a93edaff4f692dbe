//! Decision nodes of the topic manager graph.
//!
//! Every node follows the same round: refuse to run once the attempt budget
//! is spent, ask the model, keep the raw reply in `scratch`, parse it, and
//! record the outcome as the state's verdict. A rejected reply is explained
//! in `scratch` so the next attempt can see what went wrong.

use std::sync::Arc;

use async_trait::async_trait;
use topicflow_ai::{LlmClient, Message, invoke};
use tracing::{debug, info, warn};

use crate::directive::{
    Classification, Continuity, DirectiveFailure, HistoryMatch, Vocabulary, parse,
};
use crate::error::{FlowError, Result};
use crate::graph::Node;
use crate::state::{ConversationState, RoutingVerdict, StatePatch};
use crate::store::{create_topic, messages_for_active_topic, resurface_topic};
use crate::transcript::{format_dialog, format_dialog_with_topics, format_scratch, tail};

use super::prompts::{self, ANSWER_NUDGE};
use super::{CLASSIFICATION, CONTINUITY_CHECK, HISTORY_MATCH};

/// Model access and limits shared by the decision nodes.
#[derive(Clone)]
pub(crate) struct DecisionContext {
    llm: Arc<dyn LlmClient>,
    max_attempts: u32,
    transcript_window: usize,
}

impl DecisionContext {
    pub(crate) fn new(
        llm: Arc<dyn LlmClient>,
        max_attempts: u32,
        transcript_window: usize,
    ) -> Self {
        Self {
            llm,
            max_attempts: max_attempts.max(1),
            transcript_window,
        }
    }

    /// Run one model call for `node` and parse the reply with vocabulary `V`.
    ///
    /// The returned patch already records the reply; on failure it also
    /// carries the retry verdict and the incremented attempt count.
    async fn consult<V: Vocabulary>(
        &self,
        node: &str,
        state: &ConversationState,
        prompt: String,
    ) -> Result<(StatePatch, std::result::Result<V::Token, DirectiveFailure>)> {
        if state.attempts >= self.max_attempts {
            let last_failure = match &state.verdict {
                Some(RoutingVerdict::Retry(failure)) => failure.clone(),
                _ => DirectiveFailure::NoDirective,
            };
            return Err(FlowError::RetryExhausted {
                node: node.to_string(),
                attempts: state.attempts,
                last_failure,
            });
        }

        let attempt = state.attempts + 1;
        debug!(node, attempt, max = self.max_attempts, "Consulting model");
        let reply = invoke(
            self.llm.as_ref(),
            vec![Message::system(prompt), Message::user(ANSWER_NUDGE)],
        )
        .await?;

        let patch = StatePatch::new().append_scratch(reply.clone());
        match parse::<V>(&reply, state) {
            Ok(token) => Ok((patch, Ok(token))),
            Err(failure) => {
                warn!(
                    node,
                    attempt,
                    code = failure.code(),
                    error = %failure,
                    "Rejected model reply"
                );
                let patch = patch
                    .append_scratch(format!(
                        "NOTE: the answer above was rejected ({}): {failure}. \
                         End with a valid FINAL ANSWER line.",
                        failure.code()
                    ))
                    .with_attempts(attempt)
                    .with_verdict(RoutingVerdict::Retry(failure.clone()));
                Ok((patch, Err(failure)))
            }
        }
    }
}

/// Does the message continue the active topic?
pub struct ContinuityCheckNode {
    ctx: DecisionContext,
}

impl ContinuityCheckNode {
    pub(crate) fn new(ctx: DecisionContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<ConversationState> for ContinuityCheckNode {
    async fn run(&self, state: &ConversationState) -> Result<StatePatch> {
        if state.topic_stack.is_empty() {
            debug!("No active topic, skipping continuity check");
            return Ok(StatePatch::new()
                .drain_scratch()
                .with_verdict(RoutingVerdict::DifferentTopic));
        }

        let messages = messages_for_active_topic(state)?;
        let dialog = format_dialog(tail(&messages, self.ctx.transcript_window).iter().copied());
        let prompt = prompts::continuity_prompt(
            &state.current_message,
            &dialog,
            &format_scratch(&state.scratch),
        );

        let (patch, outcome) = self
            .ctx
            .consult::<Continuity>(CONTINUITY_CHECK, state, prompt)
            .await?;
        Ok(match outcome {
            Ok(Continuity::Same) => {
                debug!("Message continues the active topic");
                patch.drain_scratch().with_verdict(RoutingVerdict::SameTopic)
            }
            Ok(Continuity::Different) => {
                debug!("Message leaves the active topic");
                patch.drain_scratch().with_verdict(RoutingVerdict::DifferentTopic)
            }
            Err(_) => patch,
        })
    }
}

/// Does the message belong to an earlier topic?
pub struct HistoryMatchNode {
    ctx: DecisionContext,
}

impl HistoryMatchNode {
    pub(crate) fn new(ctx: DecisionContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<ConversationState> for HistoryMatchNode {
    async fn run(&self, state: &ConversationState) -> Result<StatePatch> {
        let topic_ids = state.topic_ids();
        if topic_ids.is_empty() {
            debug!("No topics yet, skipping history match");
            return Ok(StatePatch::new()
                .drain_scratch()
                .with_verdict(RoutingVerdict::NewTopic));
        }

        let messages: Vec<_> = state.dialogue.iter().collect();
        let dialog =
            format_dialog_with_topics(tail(&messages, self.ctx.transcript_window).iter().copied());
        let ids: Vec<String> = topic_ids.iter().map(ToString::to_string).collect();
        let prompt = prompts::history_prompt(
            &state.current_message,
            &dialog,
            &ids,
            &format_scratch(&state.scratch),
        );

        let (patch, outcome) = self
            .ctx
            .consult::<HistoryMatch>(HISTORY_MATCH, state, prompt)
            .await?;
        Ok(match outcome {
            Ok(HistoryMatch::NewTopic) => {
                debug!("No earlier topic matches");
                patch.drain_scratch().with_verdict(RoutingVerdict::NewTopic)
            }
            Ok(HistoryMatch::Existing(id)) => patch
                .and(resurface_topic(state, &id))
                .drain_scratch()
                .with_verdict(RoutingVerdict::Resurfaced(id)),
            Err(_) => patch,
        })
    }
}

/// Which handler owns a brand-new topic?
pub struct ClassificationNode {
    ctx: DecisionContext,
}

impl ClassificationNode {
    pub(crate) fn new(ctx: DecisionContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Node<ConversationState> for ClassificationNode {
    async fn run(&self, state: &ConversationState) -> Result<StatePatch> {
        let prompt =
            prompts::classification_prompt(&state.current_message, &format_scratch(&state.scratch));

        let (patch, outcome) = self
            .ctx
            .consult::<Classification>(CLASSIFICATION, state, prompt)
            .await?;
        Ok(match outcome {
            Ok(handler) => {
                info!(handler = %handler, "Classified new topic");
                patch
                    .and(create_topic(state, Some(handler)))
                    .drain_scratch()
                    .with_verdict(RoutingVerdict::Classified(handler))
            }
            Err(_) => patch,
        })
    }
}

//! Topic manager - resolves which topic a user message belongs to
//!
//! ```text
//! START -> continuity_check --SAME--------------------------------> END
//!               |  ^ retry        \--DIFFERENT--> history_match --id--> END
//!               +--+                                |  ^ retry
//!                                                   |  +--+
//!                                                   \--NEW--> classification --> END
//!                                                              ^ retry |
//!                                                              +-------+
//! ```
//!
//! The graph runs inside [`TopicManagerNode`], the entry node of the outer
//! dispatch graph, which also records the user message under the resolved
//! topic.

mod nodes;
mod prompts;

use std::sync::Arc;

use async_trait::async_trait;
use topicflow_ai::{LlmClient, Role};
use tracing::{debug, info, warn};

use crate::config::FlowConfig;
use crate::error::Result;
use crate::graph::{CompiledGraph, END, GraphBuilder, Node, Outcome, START};
use crate::state::{ConversationState, HandlerKind, ListUpdate, RoutingVerdict, StatePatch};
use crate::store::{active_topic, append_message, create_topic_with_slots};

pub use nodes::{ClassificationNode, ContinuityCheckNode, HistoryMatchNode};
use nodes::DecisionContext;

pub const CONTINUITY_CHECK: &str = "continuity_check";
pub const HISTORY_MATCH: &str = "history_match";
pub const CLASSIFICATION: &str = "classification";

/// Next step after the continuity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContinuityRoute {
    Same,
    Different,
    Retry,
}

impl Outcome for ContinuityRoute {
    const ALL: &'static [Self] = &[Self::Same, Self::Different, Self::Retry];

    fn label(self) -> &'static str {
        match self {
            Self::Same => "same",
            Self::Different => "different",
            Self::Retry => "retry",
        }
    }
}

/// Next step after the history match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryRoute {
    Found,
    New,
    Retry,
}

impl Outcome for HistoryRoute {
    const ALL: &'static [Self] = &[Self::Found, Self::New, Self::Retry];

    fn label(self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::New => "new",
            Self::Retry => "retry",
        }
    }
}

/// Next step after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassificationRoute {
    Done,
    Retry,
}

impl Outcome for ClassificationRoute {
    const ALL: &'static [Self] = &[Self::Done, Self::Retry];

    fn label(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Retry => "retry",
        }
    }
}

/// Anything but a retry verdict here means the node did not record its outcome.
fn note_retry(node: &str, verdict: &Option<RoutingVerdict>) {
    if !matches!(verdict, Some(RoutingVerdict::Retry(_))) {
        warn!(node, verdict = ?verdict, "Unexpected verdict, running node again");
    }
}

fn continuity_route(state: &ConversationState) -> ContinuityRoute {
    match &state.verdict {
        Some(RoutingVerdict::SameTopic) => ContinuityRoute::Same,
        Some(RoutingVerdict::DifferentTopic) => ContinuityRoute::Different,
        other => {
            note_retry(CONTINUITY_CHECK, other);
            ContinuityRoute::Retry
        }
    }
}

fn history_route(state: &ConversationState) -> HistoryRoute {
    match &state.verdict {
        Some(RoutingVerdict::Resurfaced(_)) => HistoryRoute::Found,
        Some(RoutingVerdict::NewTopic) => HistoryRoute::New,
        other => {
            note_retry(HISTORY_MATCH, other);
            HistoryRoute::Retry
        }
    }
}

fn classification_route(state: &ConversationState) -> ClassificationRoute {
    match &state.verdict {
        Some(RoutingVerdict::Classified(_)) => ClassificationRoute::Done,
        other => {
            note_retry(CLASSIFICATION, other);
            ClassificationRoute::Retry
        }
    }
}

/// Build the three-node topic manager graph around `llm`.
pub fn build_topic_manager_graph(
    llm: Arc<dyn LlmClient>,
    config: &FlowConfig,
) -> Result<CompiledGraph<ConversationState>> {
    let ctx = DecisionContext::new(
        llm,
        config.decision_attempts(),
        config.transcript_window,
    );

    GraphBuilder::<ConversationState>::new("topic_manager")
        .add_node(CONTINUITY_CHECK, Arc::new(ContinuityCheckNode::new(ctx.clone())))
        .add_node(HISTORY_MATCH, Arc::new(HistoryMatchNode::new(ctx.clone())))
        .add_node(CLASSIFICATION, Arc::new(ClassificationNode::new(ctx)))
        .add_edge(START, CONTINUITY_CHECK)
        .add_conditional_edges(
            CONTINUITY_CHECK,
            continuity_route,
            [
                (ContinuityRoute::Same, END),
                (ContinuityRoute::Different, HISTORY_MATCH),
                (ContinuityRoute::Retry, CONTINUITY_CHECK),
            ],
        )
        .add_conditional_edges(
            HISTORY_MATCH,
            history_route,
            [
                (HistoryRoute::Found, END),
                (HistoryRoute::New, CLASSIFICATION),
                (HistoryRoute::Retry, HISTORY_MATCH),
            ],
        )
        .add_conditional_edges(
            CLASSIFICATION,
            classification_route,
            [
                (ClassificationRoute::Done, END),
                (ClassificationRoute::Retry, CLASSIFICATION),
            ],
        )
        .with_max_steps(config.max_graph_steps)
        .compile()
}

/// Open a topic for `handler` that inherits the handing-off topic's slots and
/// records the triggering user message under it.
fn hand_off(state: &ConversationState, handler: HandlerKind) -> Result<StatePatch> {
    let slots = active_topic(state)
        .map(|topic| topic.slots.clone())
        .unwrap_or_default();
    let created = create_topic_with_slots(state, Some(handler), slots).clear_handoff();

    let mut handed = state.clone();
    handed.apply(created.clone());
    let recorded = append_message(&handed, Role::User, state.current_message.clone())?;
    info!(handler = %handler, "Handed off to a new topic");

    Ok(created.and(recorded))
}

/// Outer-graph node that resolves the active topic for the current message.
pub struct TopicManagerNode {
    graph: CompiledGraph<ConversationState>,
}

impl TopicManagerNode {
    pub fn new(llm: Arc<dyn LlmClient>, config: &FlowConfig) -> Result<Self> {
        Ok(Self {
            graph: build_topic_manager_graph(llm, config)?,
        })
    }
}

#[async_trait]
impl Node<ConversationState> for TopicManagerNode {
    async fn run(&self, state: &ConversationState) -> Result<StatePatch> {
        if let Some(handler) = state.handoff {
            return hand_off(state, handler);
        }

        let mut round = state.clone();
        round.verdict = None;
        round.attempts = 0;
        let resolved = self.graph.invoke(round).await?;

        let recorded = append_message(&resolved, Role::User, state.current_message.clone())?;
        if let Some(topic) = active_topic(&resolved) {
            debug!(topic_id = %topic.id, handler = ?topic.handler, "Topic resolved");
        }

        Ok(StatePatch {
            topic_stack: ListUpdate::Replace(resolved.topic_stack),
            archive: ListUpdate::Replace(resolved.archive),
            scratch: ListUpdate::Replace(resolved.scratch),
            ..StatePatch::default()
        }
        .clear_verdict()
        .with_attempts(0)
        .and(recorded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::DirectiveFailure;
    use crate::error::FlowError;
    use crate::state::Topic;
    use crate::store::messages_for_active_topic;
    use topicflow_ai::MockLlmClient;

    fn manager(replies: &[&str]) -> (TopicManagerNode, Arc<MockLlmClient>) {
        let llm = Arc::new(MockLlmClient::from_replies("mock", replies.iter().copied()).strict());
        let node = TopicManagerNode::new(llm.clone(), &FlowConfig::default()).unwrap();
        (node, llm)
    }

    fn with_message(mut state: ConversationState, message: &str) -> ConversationState {
        state.current_message = message.to_string();
        state
    }

    #[tokio::test]
    async fn test_first_message_goes_straight_to_classification() {
        let (node, llm) = manager(&["THOUGHT: symptoms\nFINAL ANSWER: DIAGNOSIS"]);
        let mut state = with_message(ConversationState::new(), "my throat hurts");

        let patch = node.run(&state).await.unwrap();
        state.apply(patch);

        assert_eq!(state.topic_stack.len(), 1);
        assert_eq!(state.topic_stack[0].handler, Some(HandlerKind::Diagnosis));
        assert!(state.scratch.is_empty());
        assert_eq!(state.attempts, 0);
        assert_eq!(state.verdict, None);
        assert_eq!(state.dialogue.len(), 1);
        assert_eq!(state.dialogue[0].topic_id, state.topic_stack[0].id);
        assert_eq!(state.dialogue[0].content, "my throat hurts");
        // Only the classification node consulted the model.
        assert_eq!(llm.recorded_requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_topic_keeps_stack() {
        let (node, _) = manager(&["FINAL ANSWER: SAME TOPIC"]);
        let mut state = ConversationState::new();
        let topic = Topic::new(Some(HandlerKind::Diagnosis));
        let id = topic.id;
        state.topic_stack.push(topic);
        let mut state = with_message(state, "since yesterday");

        let patch = node.run(&state).await.unwrap();
        state.apply(patch);

        assert_eq!(state.topic_ids(), vec![id]);
        let messages = messages_for_active_topic(&state).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].topic_id, id);
    }

    #[tokio::test]
    async fn test_invalid_reply_is_retried() {
        let (node, llm) = manager(&[
            "FINAL ANSWER: DIFFERENT",
            "I think it is new",
            "FINAL ANSWER: NEW TOPIC",
            "FINAL ANSWER: APPOINTMENT",
        ]);
        let mut state = ConversationState::new();
        state.topic_stack.push(Topic::new(Some(HandlerKind::Diagnosis)));
        let mut state = with_message(state, "book me a visit");

        let patch = node.run(&state).await.unwrap();
        state.apply(patch);

        assert_eq!(state.topic_stack.len(), 2);
        assert_eq!(state.topic_stack[1].handler, Some(HandlerKind::Appointment));
        assert!(state.scratch.is_empty());

        let requests = llm.recorded_requests().await;
        assert_eq!(requests.len(), 4);
        // The retried history prompt carries the rejected reply and the reason.
        let retry_prompt = &requests[2].messages[0].content;
        assert!(retry_prompt.contains("I think it is new"));
        assert!(retry_prompt.contains("NO_DIRECTIVE"));
    }

    #[tokio::test]
    async fn test_unknown_reference_exhausts_retries() {
        let bogus = "FINAL ANSWER: ffffffff-0000-4000-8000-000000000000";
        let (node, _) = manager(&["FINAL ANSWER: DIFFERENT", bogus, bogus, bogus]);
        let mut state = ConversationState::new();
        state.topic_stack.push(Topic::new(Some(HandlerKind::Diagnosis)));
        let state = with_message(state, "what about the other thing");

        let err = node.run(&state).await.err().unwrap();
        match err {
            FlowError::RetryExhausted {
                node,
                attempts,
                last_failure,
            } => {
                assert_eq!(node, HISTORY_MATCH);
                assert_eq!(attempts, 3);
                assert!(matches!(
                    last_failure,
                    DirectiveFailure::UnknownTopicReference(_)
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_pending_handoff_skips_decisions() {
        let (node, llm) = manager(&[]);
        let mut state = ConversationState::new();
        let mut diagnosis = Topic::new(Some(HandlerKind::Diagnosis));
        diagnosis.slots.appointment.clinic = Some("Cardiology".to_string());
        diagnosis.slots.symptoms.push("chest pain".to_string());
        let diagnosis_id = diagnosis.id;
        state.topic_stack.push(diagnosis);
        state.handoff = Some(HandlerKind::Appointment);
        let mut state = with_message(state, "I need to see someone");

        let patch = node.run(&state).await.unwrap();
        state.apply(patch);

        assert_eq!(state.topic_stack.len(), 2);
        let appointment = &state.topic_stack[1];
        assert_eq!(appointment.handler, Some(HandlerKind::Appointment));
        assert_eq!(appointment.slots, state.topic_stack[0].slots);
        assert_eq!(state.topic_stack[0].id, diagnosis_id);
        assert_eq!(state.handoff, None);

        assert_eq!(state.dialogue.len(), 1);
        assert_eq!(state.dialogue[0].topic_id, appointment.id);
        assert_eq!(state.dialogue[0].content, "I need to see someone");
        assert!(llm.recorded_requests().await.is_empty());
    }

    #[test]
    fn test_unexpected_verdict_reruns_node() {
        let mut state = ConversationState::new();
        assert_eq!(continuity_route(&state), ContinuityRoute::Retry);

        state.verdict = Some(RoutingVerdict::NewTopic);
        assert_eq!(continuity_route(&state), ContinuityRoute::Retry);
        assert_eq!(history_route(&state), HistoryRoute::New);
        assert_eq!(classification_route(&state), ClassificationRoute::Retry);
    }
}

//! Outer dispatch graph
//!
//! ```text
//! START -> topic_manager --handler--> diagnosis | appointment | small_talk | out_of_topic
//!               ^                          |
//!               +------- handoff ----------+--> END
//! ```
//!
//! After the topic manager resolves the active topic, its handler is run.
//! Handlers that support hand-off loop back to the topic manager when they
//! request one; every other handler ends the turn.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use topicflow_ai::LlmClient;
use tracing::{debug, warn};

use crate::config::FlowConfig;
use crate::error::Result;
use crate::graph::{CompiledGraph, END, GraphBuilder, Node, Outcome, START};
use crate::handlers::{HandlerNode, HandlerSet};
use crate::state::{ConversationState, HandlerKind, StatePatch};
use crate::store::active_topic;
use crate::topic_manager::TopicManagerNode;

pub const TOPIC_MANAGER: &str = "topic_manager";

/// Where the topic manager sends the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerRoute {
    Handler(HandlerKind),
    /// No active topic, or the topic has no handler.
    Unroutable,
}

impl Outcome for HandlerRoute {
    const ALL: &'static [Self] = &[
        Self::Handler(HandlerKind::Diagnosis),
        Self::Handler(HandlerKind::Appointment),
        Self::Handler(HandlerKind::SmallTalk),
        Self::Handler(HandlerKind::OutOfTopic),
        Self::Unroutable,
    ];

    fn label(self) -> &'static str {
        match self {
            Self::Handler(kind) => kind.node_name(),
            Self::Unroutable => "unroutable",
        }
    }
}

/// Whether a hand-off capable handler loops back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandoffRoute {
    Handoff,
    Finish,
}

impl Outcome for HandoffRoute {
    const ALL: &'static [Self] = &[Self::Handoff, Self::Finish];

    fn label(self) -> &'static str {
        match self {
            Self::Handoff => "handoff",
            Self::Finish => "finish",
        }
    }
}

/// Adapts a [`HandlerNode`] to the graph's node contract.
struct HandlerStep {
    kind: HandlerKind,
    handler: Arc<dyn HandlerNode>,
}

#[async_trait]
impl Node<ConversationState> for HandlerStep {
    async fn run(&self, state: &ConversationState) -> Result<StatePatch> {
        debug!(handler = %self.kind, "Dispatching to handler");
        self.handler.run(state).await
    }
}

fn handler_route(registered: &HashSet<HandlerKind>, state: &ConversationState) -> HandlerRoute {
    let Some(topic) = active_topic(state) else {
        warn!(reason = "UnroutableHandler", "No active topic after topic resolution");
        return HandlerRoute::Unroutable;
    };
    let Some(kind) = topic.handler else {
        warn!(reason = "UnroutableHandler", topic_id = %topic.id, "Topic has no handler");
        return HandlerRoute::Unroutable;
    };
    if !registered.contains(&kind) {
        warn!(
            reason = "UnroutableHandler",
            topic_id = %topic.id,
            handler = %kind,
            "No handler registered for topic"
        );
    }
    HandlerRoute::Handler(kind)
}

fn handoff_route(state: &ConversationState) -> HandoffRoute {
    if state.handoff.is_some() {
        HandoffRoute::Handoff
    } else {
        HandoffRoute::Finish
    }
}

/// Build the per-turn graph: topic manager first, then the topic's handler.
pub fn build_dispatch_graph(
    llm: Arc<dyn LlmClient>,
    handlers: &HandlerSet,
    config: &FlowConfig,
) -> Result<CompiledGraph<ConversationState>> {
    let mut builder = GraphBuilder::<ConversationState>::new("dispatch")
        .add_node(TOPIC_MANAGER, Arc::new(TopicManagerNode::new(llm, config)?))
        .add_edge(START, TOPIC_MANAGER)
        .with_max_steps(config.max_graph_steps);

    let mut registered = HashSet::new();
    let mut routes = vec![(HandlerRoute::Unroutable, END)];

    for kind in HandlerKind::ALL {
        // Unregistered handlers still get a route so the turn can end cleanly.
        let Some(handler) = handlers.get(kind) else {
            debug!(handler = %kind, "Handler not registered");
            routes.push((HandlerRoute::Handler(kind), END));
            continue;
        };
        registered.insert(kind);
        routes.push((HandlerRoute::Handler(kind), kind.node_name()));

        let supports_handoff = handler.supports_handoff();
        builder = builder.add_node(
            kind.node_name(),
            Arc::new(HandlerStep {
                kind,
                handler: handler.clone(),
            }),
        );
        builder = if supports_handoff {
            builder.add_conditional_edges(
                kind.node_name(),
                handoff_route,
                [
                    (HandoffRoute::Handoff, TOPIC_MANAGER),
                    (HandoffRoute::Finish, END),
                ],
            )
        } else {
            builder.add_edge(kind.node_name(), END)
        };
    }

    builder
        .add_conditional_edges(
            TOPIC_MANAGER,
            move |state: &ConversationState| handler_route(&registered, state),
            routes,
        )
        .compile()
}

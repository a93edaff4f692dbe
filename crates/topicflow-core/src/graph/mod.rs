//! Graph module - State-machine execution graph
//!
//! A graph is a set of named nodes joined by edges:
//! - Direct edges (always taken)
//! - Conditional edges (a resolver picks one of a declared set of outcomes)
//! - Loops (a conditional edge may route back to its own node)
//!
//! Every node reads the shared state and returns a patch which the engine
//! merges before choosing the next node. Execution starts at the node wired
//! from [`START`] and stops on reaching [`END`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{FlowError, Result};

/// Unique node identifier
pub type NodeId = String;

/// Virtual entry node
pub const START: &str = "__start__";

/// Virtual terminal node
pub const END: &str = "__end__";

/// Default cap on node executions per invocation
pub const DEFAULT_MAX_STEPS: usize = 64;

/// State carried through a graph.
pub trait GraphState: Clone + Send + Sync + 'static {
    /// Partial update returned by nodes.
    type Patch: Send;

    /// Merge a node's patch into the state.
    fn apply_patch(&mut self, patch: Self::Patch);
}

/// A unit of work inside a graph.
#[async_trait]
pub trait Node<S: GraphState>: Send + Sync {
    async fn run(&self, state: &S) -> Result<S::Patch>;
}

/// Closed set of outcomes a conditional edge can resolve to.
///
/// Declaring every outcome up front lets [`GraphBuilder::compile`] reject a
/// conditional edge that leaves one of them without a target.
pub trait Outcome: Copy + Send + Sync + 'static {
    /// Every value the resolver may return.
    const ALL: &'static [Self];

    /// Route label, used for lookups and logs.
    fn label(self) -> &'static str;
}

/// Resolver of a conditional edge, erased to the outcome label.
pub type RouteFn<S> = Arc<dyn Fn(&S) -> &'static str + Send + Sync>;

/// Outgoing edge of a node
pub enum Edge<S> {
    /// Always continue to `NodeId`
    Direct(NodeId),
    /// Let `resolver` pick an outcome, then continue to its target
    Conditional {
        resolver: RouteFn<S>,
        outcomes: Vec<&'static str>,
        routes: HashMap<&'static str, NodeId>,
    },
}

/// Mutable graph definition; validated by [`GraphBuilder::compile`].
pub struct GraphBuilder<S: GraphState> {
    name: String,
    nodes: HashMap<NodeId, Arc<dyn Node<S>>>,
    edges: Vec<(NodeId, Edge<S>)>,
    duplicates: Vec<NodeId>,
    max_steps: usize,
}

impl<S: GraphState> GraphBuilder<S> {
    /// Create an empty graph definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            edges: Vec::new(),
            duplicates: Vec::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Add a named node
    pub fn add_node(mut self, name: impl Into<String>, node: Arc<dyn Node<S>>) -> Self {
        let name = name.into();
        if self.nodes.insert(name.clone(), node).is_some() {
            self.duplicates.push(name);
        }
        self
    }

    /// Add an unconditional edge
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), Edge::Direct(to.into())));
        self
    }

    /// Add a conditional edge mapping each outcome of `O` to a target
    pub fn add_conditional_edges<O, F, I, V>(
        mut self,
        from: impl Into<String>,
        resolver: F,
        routes: I,
    ) -> Self
    where
        O: Outcome,
        F: Fn(&S) -> O + Send + Sync + 'static,
        I: IntoIterator<Item = (O, V)>,
        V: Into<String>,
    {
        let routes = routes
            .into_iter()
            .map(|(outcome, target)| (outcome.label(), target.into()))
            .collect();
        self.edges.push((
            from.into(),
            Edge::Conditional {
                resolver: Arc::new(move |state: &S| resolver(state).label()),
                outcomes: O::ALL.iter().map(|outcome| outcome.label()).collect(),
                routes,
            },
        ));
        self
    }

    /// Override the per-invocation step limit
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Validate the definition and freeze it
    pub fn compile(self) -> Result<CompiledGraph<S>> {
        let invalid = |reason: String| FlowError::GraphConfig {
            graph: self.name.clone(),
            reason,
        };

        if self.max_steps == 0 {
            return Err(invalid("step limit must be at least 1".to_string()));
        }
        if let Some(name) = self.duplicates.first() {
            return Err(invalid(format!("node '{name}' is defined more than once")));
        }
        for reserved in [START, END] {
            if self.nodes.contains_key(reserved) {
                return Err(invalid(format!("'{reserved}' is a reserved node name")));
            }
        }

        let mut seen = HashSet::new();
        for (from, edge) in &self.edges {
            if !seen.insert(from.as_str()) {
                return Err(invalid(format!("node '{from}' has more than one outgoing edge")));
            }
            if from != START && !self.nodes.contains_key(from) {
                return Err(invalid(format!("edge starts at unknown node '{from}'")));
            }
            let targets: Vec<&NodeId> = match edge {
                Edge::Direct(to) => vec![to],
                Edge::Conditional {
                    outcomes, routes, ..
                } => {
                    if outcomes.is_empty() {
                        return Err(invalid(format!(
                            "conditional edge from '{from}' declares no outcomes"
                        )));
                    }
                    let unrouted: Vec<&str> = outcomes
                        .iter()
                        .copied()
                        .filter(|outcome| !routes.contains_key(*outcome))
                        .collect();
                    if !unrouted.is_empty() {
                        return Err(invalid(format!(
                            "conditional edge from '{from}' has no target for: {}",
                            unrouted.join(", ")
                        )));
                    }
                    routes.values().collect()
                }
            };
            for target in targets {
                if target != END && !self.nodes.contains_key(target) {
                    return Err(invalid(format!(
                        "edge from '{from}' targets unknown node '{target}'"
                    )));
                }
            }
        }

        if !seen.contains(START) {
            return Err(invalid("no edge leaves START".to_string()));
        }
        let mut dangling: Vec<&str> = self
            .nodes
            .keys()
            .map(String::as_str)
            .filter(|name| !seen.contains(name))
            .collect();
        if !dangling.is_empty() {
            dangling.sort_unstable();
            return Err(invalid(format!(
                "nodes without outgoing edges: {}",
                dangling.join(", ")
            )));
        }

        Ok(CompiledGraph {
            name: self.name,
            nodes: self.nodes,
            edges: self.edges.into_iter().collect(),
            max_steps: self.max_steps,
        })
    }
}

/// A validated, immutable graph
pub struct CompiledGraph<S: GraphState> {
    name: String,
    nodes: HashMap<NodeId, Arc<dyn Node<S>>>,
    edges: HashMap<NodeId, Edge<S>>,
    max_steps: usize,
}

impl<S: GraphState> CompiledGraph<S> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// Run from START until END, returning the final state.
    pub async fn invoke(&self, mut state: S) -> Result<S> {
        let mut current = self.next_node(START, &state)?;
        let mut steps = 0usize;

        while current != END {
            if steps >= self.max_steps {
                return Err(FlowError::StepLimitExceeded {
                    graph: self.name.clone(),
                    limit: self.max_steps,
                });
            }
            steps += 1;

            let node = self.nodes.get(&current).ok_or_else(|| FlowError::GraphConfig {
                graph: self.name.clone(),
                reason: format!("node '{current}' is not registered"),
            })?;
            debug!(graph = %self.name, node = %current, step = steps, "Running node");

            let patch = node.run(&state).await?;
            state.apply_patch(patch);
            current = self.next_node(&current, &state)?;
        }

        debug!(graph = %self.name, steps, "Graph reached END");
        Ok(state)
    }

    fn next_node(&self, from: &str, state: &S) -> Result<NodeId> {
        match self.edges.get(from) {
            Some(Edge::Direct(to)) => Ok(to.clone()),
            Some(Edge::Conditional {
                resolver, routes, ..
            }) => {
                let outcome = resolver(state);
                routes
                    .get(outcome)
                    .cloned()
                    .ok_or_else(|| FlowError::UndeclaredRoute {
                        graph: self.name.clone(),
                        from: from.to_string(),
                        route: outcome.to_string(),
                    })
            }
            None => Err(FlowError::GraphConfig {
                graph: self.name.clone(),
                reason: format!("node '{from}' has no outgoing edge"),
            }),
        }
    }
}

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::graph::DEFAULT_MAX_STEPS;

/// Decision nodes a single topic-manager round can pass through.
const DECISION_NODES: usize = 3;

/// Default number of model calls a decision node may spend per round.
pub const DEFAULT_MAX_DECISION_ATTEMPTS: u32 = 3;

/// Default number of dialogue messages shown to decision prompts.
pub const DEFAULT_TRANSCRIPT_WINDOW: usize = 40;

/// Tuning knobs for a [`crate::TurnRunner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Model calls allowed per decision node per round (minimum 1).
    pub max_decision_attempts: u32,
    /// Node executions allowed per graph invocation.
    pub max_graph_steps: usize,
    /// Trailing dialogue messages included in decision prompts.
    pub transcript_window: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_decision_attempts: DEFAULT_MAX_DECISION_ATTEMPTS,
            max_graph_steps: DEFAULT_MAX_STEPS,
            transcript_window: DEFAULT_TRANSCRIPT_WINDOW,
        }
    }
}

impl FlowConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_decision_attempts(mut self, attempts: u32) -> Self {
        self.max_decision_attempts = attempts.max(1);
        self
    }

    pub fn with_max_graph_steps(mut self, steps: usize) -> Self {
        self.max_graph_steps = steps;
        self
    }

    pub fn with_transcript_window(mut self, window: usize) -> Self {
        self.transcript_window = window;
        self
    }

    /// Attempt budget with the lower bound applied.
    pub(crate) fn decision_attempts(&self) -> u32 {
        self.max_decision_attempts.max(1)
    }

    /// Steps the topic manager needs when every decision node spends its
    /// whole budget, plus the run that reports exhaustion.
    pub fn required_graph_steps(&self) -> usize {
        DECISION_NODES * self.decision_attempts() as usize + 1
    }

    /// Check that the step limit cannot cut a decision round short.
    pub fn validate(&self) -> Result<()> {
        let required = self.required_graph_steps();
        if self.max_graph_steps < required {
            return Err(FlowError::InvalidConfig(format!(
                "max_graph_steps is {} but {} decision attempts need at least {required}",
                self.max_graph_steps,
                self.decision_attempts()
            )));
        }
        Ok(())
    }
}

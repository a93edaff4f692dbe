//! Conversation state, topics and the patch type nodes return.
//!
//! Nodes never mutate a [`ConversationState`] directly. They return a
//! [`StatePatch`] that the graph engine merges with a fixed per-field policy:
//! the dialogue only ever grows, other list fields append unless the patch
//! carries a full replacement, scalar fields overwrite.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use topicflow_ai::Role;
use uuid::Uuid;

use crate::directive::DirectiveFailure;
use crate::graph::GraphState;

/// Opaque, globally unique topic identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(Uuid);

impl TopicId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TopicId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TopicId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// The closed set of handlers a topic can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerKind {
    /// Clinical questions and symptom triage.
    Diagnosis,
    /// Scheduling and visit logistics.
    Appointment,
    /// Greetings, thanks and meta chatter.
    SmallTalk,
    /// Anything unrelated to healthcare tasks.
    OutOfTopic,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 4] = [
        HandlerKind::Diagnosis,
        HandlerKind::Appointment,
        HandlerKind::SmallTalk,
        HandlerKind::OutOfTopic,
    ];

    /// Directive token, as printed in decision prompts.
    pub fn token(&self) -> &'static str {
        match self {
            HandlerKind::Diagnosis => "DIAGNOSIS",
            HandlerKind::Appointment => "APPOINTMENT",
            HandlerKind::SmallTalk => "SMALL_TALK",
            HandlerKind::OutOfTopic => "OUT_OF_TOPIC",
        }
    }

    /// Name of the dispatch graph node serving this handler.
    pub fn node_name(&self) -> &'static str {
        match self {
            HandlerKind::Diagnosis => "diagnosis",
            HandlerKind::Appointment => "appointment",
            HandlerKind::SmallTalk => "small_talk",
            HandlerKind::OutOfTopic => "out_of_topic",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Appointment fields collected while scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentSlots {
    pub hospital_name: Option<String>,
    pub doctor_name: Option<String>,
    pub clinic: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
}

/// Handler-specific, partially filled record carried by a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSlots {
    pub person_name: Option<String>,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default)]
    pub appointment: AppointmentSlots,
}

/// A coherent conversational thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub handler: Option<HandlerKind>,
    #[serde(default)]
    pub slots: TopicSlots,
}

impl Topic {
    pub fn new(handler: Option<HandlerKind>) -> Self {
        Self {
            id: TopicId::new(),
            handler,
            slots: TopicSlots::default(),
        }
    }
}

/// One dialogue entry, tagged with the topic active when it was appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueMessage {
    pub topic_id: TopicId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome of the most recent decision node, read by conditional edges.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingVerdict {
    SameTopic,
    DifferentTopic,
    NewTopic,
    Resurfaced(TopicId),
    Classified(HandlerKind),
    /// The node produced no usable directive and should run again.
    Retry(DirectiveFailure),
}

/// Shared state of one conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    /// Latest raw user input.
    #[serde(default)]
    pub current_message: String,
    /// Append-only, topic-tagged message log.
    #[serde(default)]
    pub dialogue: Vec<DialogueMessage>,
    /// Intermediate decision outputs of the running round.
    #[serde(default)]
    pub scratch: Vec<String>,
    /// Open topics; the last one is active.
    #[serde(default)]
    pub topic_stack: Vec<Topic>,
    /// Topics set aside but still resumable.
    #[serde(default)]
    pub archive: Vec<Topic>,
    #[serde(skip)]
    pub verdict: Option<RoutingVerdict>,
    /// Model calls spent by the current decision node in this round.
    #[serde(skip)]
    pub attempts: u32,
    /// Hand-off requested by the last handler.
    #[serde(skip)]
    pub handoff: Option<HandlerKind>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` names a topic on the stack or in the archive.
    pub fn contains_topic(&self, id: &TopicId) -> bool {
        self.topic_stack
            .iter()
            .chain(self.archive.iter())
            .any(|topic| topic.id == *id)
    }

    /// Every known topic id, stack first.
    pub fn topic_ids(&self) -> Vec<TopicId> {
        self.topic_stack
            .iter()
            .chain(self.archive.iter())
            .map(|topic| topic.id)
            .collect()
    }

    /// Merge a patch into this state.
    pub fn apply(&mut self, patch: StatePatch) {
        if let Some(message) = patch.current_message {
            self.current_message = message;
        }
        self.dialogue.extend(patch.dialogue);
        patch.scratch.apply_to(&mut self.scratch);
        patch.topic_stack.apply_to(&mut self.topic_stack);
        patch.archive.apply_to(&mut self.archive);
        if let Some(verdict) = patch.verdict {
            self.verdict = verdict;
        }
        if let Some(attempts) = patch.attempts {
            self.attempts = attempts;
        }
        if let Some(handoff) = patch.handoff {
            self.handoff = handoff;
        }
    }
}

impl GraphState for ConversationState {
    type Patch = StatePatch;

    fn apply_patch(&mut self, patch: StatePatch) {
        self.apply(patch);
    }
}

/// Update applied to one list field.
#[derive(Debug, Clone, PartialEq)]
pub enum ListUpdate<T> {
    Keep,
    Append(Vec<T>),
    Replace(Vec<T>),
}

impl<T> Default for ListUpdate<T> {
    fn default() -> Self {
        ListUpdate::Keep
    }
}

impl<T> ListUpdate<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, ListUpdate::Keep)
    }

    /// Compose two updates so that applying the result equals applying
    /// `self` then `next`.
    pub fn then(self, next: ListUpdate<T>) -> ListUpdate<T> {
        match (self, next) {
            (current, ListUpdate::Keep) => current,
            (_, ListUpdate::Replace(items)) => ListUpdate::Replace(items),
            (ListUpdate::Keep, ListUpdate::Append(items)) => ListUpdate::Append(items),
            (ListUpdate::Append(mut head), ListUpdate::Append(tail)) => {
                head.extend(tail);
                ListUpdate::Append(head)
            }
            (ListUpdate::Replace(mut head), ListUpdate::Append(tail)) => {
                head.extend(tail);
                ListUpdate::Replace(head)
            }
        }
    }

    fn apply_to(self, target: &mut Vec<T>) {
        match self {
            ListUpdate::Keep => {}
            ListUpdate::Append(items) => target.extend(items),
            ListUpdate::Replace(items) => *target = items,
        }
    }
}

/// Partial update returned by nodes and store operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatePatch {
    pub current_message: Option<String>,
    /// Messages appended to the dialogue; there is no way to remove one.
    pub dialogue: Vec<DialogueMessage>,
    pub scratch: ListUpdate<String>,
    pub topic_stack: ListUpdate<Topic>,
    pub archive: ListUpdate<Topic>,
    pub verdict: Option<Option<RoutingVerdict>>,
    pub attempts: Option<u32>,
    pub handoff: Option<Option<HandlerKind>>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when applying the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == StatePatch::default()
    }

    /// Sequential composition: `a.and(b)` applied equals `a` then `b`.
    pub fn and(self, next: StatePatch) -> StatePatch {
        let mut dialogue = self.dialogue;
        dialogue.extend(next.dialogue);
        StatePatch {
            current_message: next.current_message.or(self.current_message),
            dialogue,
            scratch: self.scratch.then(next.scratch),
            topic_stack: self.topic_stack.then(next.topic_stack),
            archive: self.archive.then(next.archive),
            verdict: next.verdict.or(self.verdict),
            attempts: next.attempts.or(self.attempts),
            handoff: next.handoff.or(self.handoff),
        }
    }

    pub fn with_current_message(mut self, message: impl Into<String>) -> Self {
        self.current_message = Some(message.into());
        self
    }

    pub fn append_scratch(mut self, entry: impl Into<String>) -> Self {
        let scratch = std::mem::take(&mut self.scratch);
        self.scratch = scratch.then(ListUpdate::Append(vec![entry.into()]));
        self
    }

    /// Empty the scratch list and reset the attempt counter.
    pub fn drain_scratch(mut self) -> Self {
        self.scratch = ListUpdate::Replace(Vec::new());
        self.attempts = Some(0);
        self
    }

    pub fn with_verdict(mut self, verdict: RoutingVerdict) -> Self {
        self.verdict = Some(Some(verdict));
        self
    }

    pub fn clear_verdict(mut self) -> Self {
        self.verdict = Some(None);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn request_handoff(mut self, handler: HandlerKind) -> Self {
        self.handoff = Some(Some(handler));
        self
    }

    pub fn clear_handoff(mut self) -> Self {
        self.handoff = Some(None);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_update_composition() {
        let appended = ListUpdate::Append(vec![1]).then(ListUpdate::Append(vec![2]));
        assert_eq!(appended, ListUpdate::Append(vec![1, 2]));

        let replaced = ListUpdate::Append(vec![1]).then(ListUpdate::Replace(vec![9]));
        assert_eq!(replaced, ListUpdate::Replace(vec![9]));

        let extended = ListUpdate::Replace(vec![1]).then(ListUpdate::Append(vec![2]));
        assert_eq!(extended, ListUpdate::Replace(vec![1, 2]));

        let kept: ListUpdate<i32> = ListUpdate::Keep.then(ListUpdate::Keep);
        assert!(kept.is_keep());
    }

    #[test]
    fn test_apply_appends_lists_and_overwrites_scalars() {
        let mut state = ConversationState::new();
        state.scratch.push("old thought".to_string());

        state.apply(
            StatePatch::new()
                .with_current_message("hello")
                .append_scratch("new thought")
                .with_attempts(2),
        );

        assert_eq!(state.current_message, "hello");
        assert_eq!(state.scratch, vec!["old thought", "new thought"]);
        assert_eq!(state.attempts, 2);

        state.apply(StatePatch::new().with_current_message("again").drain_scratch());
        assert_eq!(state.current_message, "again");
        assert!(state.scratch.is_empty());
        assert_eq!(state.attempts, 0);
    }

    #[test]
    fn test_patch_and_matches_sequential_apply() {
        let first = StatePatch::new()
            .append_scratch("a")
            .request_handoff(HandlerKind::Appointment);
        let second = StatePatch::new().append_scratch("b").clear_handoff();

        let mut sequential = ConversationState::new();
        sequential.apply(first.clone());
        sequential.apply(second.clone());

        let mut composed = ConversationState::new();
        composed.apply(first.and(second));

        assert_eq!(sequential.scratch, composed.scratch);
        assert_eq!(sequential.handoff, composed.handoff);
        assert_eq!(composed.handoff, None);
    }

    #[test]
    fn test_dialogue_patches_only_append() {
        let mut state = ConversationState::new();
        let topic = Topic::new(Some(HandlerKind::Diagnosis));
        let message = |content: &str| DialogueMessage {
            topic_id: topic.id,
            role: Role::User,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        state.dialogue.push(message("first"));

        let patch = StatePatch {
            dialogue: vec![message("second")],
            ..StatePatch::default()
        }
        .and(StatePatch {
            dialogue: vec![message("third")],
            ..StatePatch::default()
        });
        state.apply(patch);
        state.apply(StatePatch::default());

        let contents: Vec<_> = state.dialogue.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_empty_patch_detection() {
        assert!(StatePatch::new().is_empty());
        assert!(!StatePatch::new().clear_verdict().is_empty());
    }

    #[test]
    fn test_state_round_trips_without_routing_bookkeeping() {
        let mut state = ConversationState::new();
        state.topic_stack.push(Topic::new(Some(HandlerKind::SmallTalk)));
        state.attempts = 2;
        state.handoff = Some(HandlerKind::Appointment);

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("SMALL_TALK"));

        let restored: ConversationState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.topic_stack, state.topic_stack);
        assert_eq!(restored.attempts, 0);
        assert_eq!(restored.handoff, None);
    }

    #[test]
    fn test_topic_id_displays_hyphenated() {
        let id = TopicId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.matches('-').count(), 4);
    }
}

//! Topic & dialogue store operations.
//!
//! These are the only functions allowed to change the identity or order of
//! `topic_stack` and `archive`. Each returns a [`StatePatch`]; nothing here
//! mutates the state it reads.

use std::collections::HashSet;

use chrono::Utc;
use topicflow_ai::Role;
use tracing::{debug, info};

use crate::error::{FlowError, Result};
use crate::state::{
    ConversationState, DialogueMessage, HandlerKind, ListUpdate, StatePatch, Topic, TopicId,
    TopicSlots,
};

/// Push a new topic bound to `handler` on top of the stack.
pub fn create_topic(state: &ConversationState, handler: Option<HandlerKind>) -> StatePatch {
    create_topic_with_slots(state, handler, TopicSlots::default())
}

/// Push a new topic that starts from already collected `slots`.
pub fn create_topic_with_slots(
    state: &ConversationState,
    handler: Option<HandlerKind>,
    slots: TopicSlots,
) -> StatePatch {
    let topic = Topic {
        slots,
        ..Topic::new(handler)
    };
    info!(
        topic_id = %topic.id,
        handler = ?handler,
        depth = state.topic_stack.len() + 1,
        "Created topic"
    );
    StatePatch {
        topic_stack: ListUpdate::Append(vec![topic]),
        ..StatePatch::default()
    }
}

/// Move the active topic to the end of the archive.
pub fn disclose_active_topic(state: &ConversationState) -> StatePatch {
    let mut stack = state.topic_stack.clone();
    let Some(topic) = stack.pop() else {
        return StatePatch::default();
    };

    info!(topic_id = %topic.id, "Archived active topic");
    let mut archive = state.archive.clone();
    archive.push(topic);

    StatePatch {
        topic_stack: ListUpdate::Replace(stack),
        archive: ListUpdate::Replace(archive),
        ..StatePatch::default()
    }
}

/// Bring the topic `id` to the top of the stack, wherever it currently is.
///
/// Returns an empty patch when `id` is unknown. Resurfacing the topic that
/// is already active still yields a stack replacement with unchanged order.
pub fn resurface_topic(state: &ConversationState, id: &TopicId) -> StatePatch {
    if let Some(index) = state.topic_stack.iter().position(|t| t.id == *id) {
        let mut stack = state.topic_stack.clone();
        let topic = stack.remove(index);
        stack.push(topic);
        info!(topic_id = %id, from = "stack", "Resurfaced topic");
        return StatePatch {
            topic_stack: ListUpdate::Replace(stack),
            ..StatePatch::default()
        };
    }

    if let Some(index) = state.archive.iter().position(|t| t.id == *id) {
        let mut archive = state.archive.clone();
        let topic = archive.remove(index);
        let mut stack = state.topic_stack.clone();
        stack.push(topic);
        info!(topic_id = %id, from = "archive", "Resurfaced topic");
        return StatePatch {
            topic_stack: ListUpdate::Replace(stack),
            archive: ListUpdate::Replace(archive),
            ..StatePatch::default()
        };
    }

    debug!(topic_id = %id, "Resurface target not found");
    StatePatch::default()
}

/// Fail when a topic id appears more than once across stack and archive.
///
/// Store operations keep ids unique; this guards states loaded from outside.
pub fn check_topic_ids(state: &ConversationState) -> Result<()> {
    let mut seen = HashSet::new();
    for id in state.topic_ids() {
        if !seen.insert(id) {
            return Err(FlowError::StateInvariantViolation(format!(
                "topic {id} appears more than once in the topic stack and archive"
            )));
        }
    }
    Ok(())
}

/// The topic on top of the stack, if any.
pub fn active_topic(state: &ConversationState) -> Option<&Topic> {
    state.topic_stack.last()
}

/// Append a message tagged with the active topic.
pub fn append_message(
    state: &ConversationState,
    role: Role,
    content: impl Into<String>,
) -> Result<StatePatch> {
    let topic = active_topic(state).ok_or_else(|| FlowError::no_active_topic("append_message"))?;
    Ok(StatePatch {
        dialogue: vec![DialogueMessage {
            topic_id: topic.id,
            role,
            content: content.into(),
            created_at: Utc::now(),
        }],
        ..StatePatch::default()
    })
}

/// Messages tagged with `id`, in dialogue order.
pub fn messages_for_topic<'a>(
    state: &'a ConversationState,
    id: &TopicId,
) -> Vec<&'a DialogueMessage> {
    state
        .dialogue
        .iter()
        .filter(|message| message.topic_id == *id)
        .collect()
}

/// Messages tagged with the active topic, in dialogue order.
pub fn messages_for_active_topic(state: &ConversationState) -> Result<Vec<&DialogueMessage>> {
    let topic = active_topic(state)
        .ok_or_else(|| FlowError::no_active_topic("messages_for_active_topic"))?;
    Ok(messages_for_topic(state, &topic.id))
}

/// Rewrite the active topic's slots without touching stack order.
pub fn update_active_slots<F>(state: &ConversationState, update: F) -> Result<StatePatch>
where
    F: FnOnce(&mut TopicSlots),
{
    let mut stack = state.topic_stack.clone();
    let topic = stack
        .last_mut()
        .ok_or_else(|| FlowError::no_active_topic("update_active_slots"))?;
    update(&mut topic.slots);
    Ok(StatePatch {
        topic_stack: ListUpdate::Replace(stack),
        ..StatePatch::default()
    })
}

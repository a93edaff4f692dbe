use comfy_table::{Cell, Table};
use topicflow_core::store::messages_for_topic;
use topicflow_core::{ConversationState, Topic};

/// Stack (top first) followed by the archive.
pub fn topics_table(state: &ConversationState) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Status", "Topic", "Handler", "Messages", "Clinic"]);

    let active = state.topic_stack.len().checked_sub(1);
    for (index, topic) in state.topic_stack.iter().enumerate().rev() {
        let status = if Some(index) == active { "active" } else { "open" };
        table.add_row(topic_row(state, topic, status));
    }
    for topic in state.archive.iter().rev() {
        table.add_row(topic_row(state, topic, "archived"));
    }
    table
}

fn topic_row(state: &ConversationState, topic: &Topic, status: &str) -> Vec<Cell> {
    let handler = topic
        .handler
        .map(|handler| handler.to_string())
        .unwrap_or_else(|| "-".to_string());
    vec![
        Cell::new(status),
        Cell::new(short_id(&topic.id.to_string())),
        Cell::new(handler),
        Cell::new(messages_for_topic(state, &topic.id).len()),
        Cell::new(topic.slots.appointment.clinic.as_deref().unwrap_or("-")),
    ]
}

pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

//! Plain-text renderings of dialogue used inside decision prompts.

use crate::state::DialogueMessage;

/// Keep only the last `window` messages.
pub fn tail<'a>(messages: &'a [&'a DialogueMessage], window: usize) -> &'a [&'a DialogueMessage] {
    let start = messages.len().saturating_sub(window);
    &messages[start..]
}

/// One line per message: `role: content`.
pub fn format_dialog<'a, I>(messages: I) -> String
where
    I: IntoIterator<Item = &'a DialogueMessage>,
{
    messages
        .into_iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One line per message with its topic tag: `[topic:<id>] role: content`.
pub fn format_dialog_with_topics<'a, I>(messages: I) -> String
where
    I: IntoIterator<Item = &'a DialogueMessage>,
{
    messages
        .into_iter()
        .map(|m| format!("[topic:{}] {}: {}", m.topic_id, m.role.as_str(), m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Numbered scratch entries, or a placeholder when there are none.
pub fn format_scratch(scratch: &[String]) -> String {
    if scratch.is_empty() {
        return "(none yet)".to_string();
    }
    scratch
        .iter()
        .enumerate()
        .map(|(i, entry)| format!("{}. {}", i + 1, entry.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

//! Domain handlers dispatched per topic.
//!
//! A handler reads the conversation, answers the user under the active
//! topic and may ask the dispatcher to continue the turn under a new topic
//! bound to another handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use topicflow_ai::{LlmClient, Message, Role, invoke};
use tracing::{debug, info, warn};

use crate::directive::{
    CLINIC_MARKER, DirectiveFailure, HANDOFF_MARKER, Handoff, extract_raw_payload, parse,
    strip_directive_lines,
};
use crate::error::{FlowError, Result};
use crate::state::{ConversationState, HandlerKind, StatePatch, TopicSlots};
use crate::store::{active_topic, append_message, messages_for_active_topic, update_active_slots};
use crate::transcript::tail;

/// Topic messages replayed to a handler model.
const HANDLER_WINDOW: usize = 40;

const OUT_OF_TOPIC_REPLY: &str = "I can only help with health questions and hospital \
appointments. Is there anything like that I can do for you?";

/// A domain-specific turn processor.
#[async_trait]
pub trait HandlerNode: Send + Sync {
    async fn run(&self, state: &ConversationState) -> Result<StatePatch>;

    /// Whether the handler may request a hand-off.
    fn supports_handoff(&self) -> bool {
        false
    }
}

/// Model-backed handler: system prompt plus the active topic's messages.
pub struct ChatHandler {
    kind: HandlerKind,
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
    handoff: bool,
}

impl ChatHandler {
    pub fn new(
        kind: HandlerKind,
        llm: Arc<dyn LlmClient>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            llm,
            system_prompt: system_prompt.into(),
            handoff: false,
        }
    }

    /// Symptom triage. Can record a clinic and hand off to scheduling.
    pub fn diagnosis(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(HandlerKind::Diagnosis, llm, DIAGNOSIS_PROMPT).with_handoff(true)
    }

    pub fn appointment(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(HandlerKind::Appointment, llm, APPOINTMENT_PROMPT)
    }

    pub fn small_talk(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(HandlerKind::SmallTalk, llm, SMALL_TALK_PROMPT)
    }

    pub fn with_handoff(mut self, enabled: bool) -> Self {
        self.handoff = enabled;
        self
    }

    fn system_message(&self, slots: &TopicSlots) -> Message {
        match describe_slots(slots) {
            Some(known) => Message::system(format!(
                "{}\n\nDetails collected so far:\n{known}",
                self.system_prompt
            )),
            None => Message::system(self.system_prompt.clone()),
        }
    }

    fn handoff_target(&self, reply: &str, state: &ConversationState) -> Option<HandlerKind> {
        match parse::<Handoff>(reply, state) {
            Ok(target) if target == self.kind => {
                debug!(handler = %self.kind, "Ignoring hand-off to self");
                None
            }
            Ok(target) => Some(target),
            Err(DirectiveFailure::NoDirective) => None,
            Err(failure) => {
                warn!(handler = %self.kind, error = %failure, "Ignoring malformed hand-off");
                None
            }
        }
    }
}

#[async_trait]
impl HandlerNode for ChatHandler {
    async fn run(&self, state: &ConversationState) -> Result<StatePatch> {
        let topic = active_topic(state).ok_or_else(|| FlowError::no_active_topic("handler"))?;
        let history = messages_for_active_topic(state)?;

        let mut messages = vec![self.system_message(&topic.slots)];
        messages.extend(
            tail(&history, HANDLER_WINDOW)
                .iter()
                .map(|message| Message {
                    role: message.role,
                    content: message.content.clone(),
                }),
        );

        debug!(handler = %self.kind, messages = messages.len(), "Invoking handler model");
        let reply = invoke(self.llm.as_ref(), messages).await?;

        let mut patch = StatePatch::new();
        let mut visible = reply.clone();

        if let Some(clinic) = extract_raw_payload(&reply, CLINIC_MARKER) {
            info!(handler = %self.kind, clinic = %clinic, "Recorded clinic");
            patch = patch.and(update_active_slots(state, |slots| {
                slots.appointment.clinic = Some(clinic);
            })?);
            visible = strip_directive_lines(&visible, CLINIC_MARKER);
        }

        if self.handoff {
            if let Some(target) = self.handoff_target(&reply, state) {
                info!(from = %self.kind, to = %target, "Handler requested hand-off");
                patch = patch.request_handoff(target);
            }
            visible = strip_directive_lines(&visible, HANDOFF_MARKER);
        }

        if !visible.is_empty() {
            patch = patch.and(append_message(state, Role::Assistant, visible)?);
        }
        Ok(patch)
    }

    fn supports_handoff(&self) -> bool {
        self.handoff
    }
}

/// Answers with a fixed message and never calls the model.
pub struct StaticReplyHandler {
    reply: String,
}

impl StaticReplyHandler {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }

    pub fn out_of_topic() -> Self {
        Self::new(OUT_OF_TOPIC_REPLY)
    }
}

#[async_trait]
impl HandlerNode for StaticReplyHandler {
    async fn run(&self, state: &ConversationState) -> Result<StatePatch> {
        append_message(state, Role::Assistant, self.reply.clone())
    }
}

/// Handlers available to the dispatcher, keyed by kind.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<HandlerKind, Arc<dyn HandlerNode>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stock handlers, all sharing `llm`.
    pub fn defaults(llm: Arc<dyn LlmClient>) -> Self {
        Self::new()
            .with(HandlerKind::Diagnosis, Arc::new(ChatHandler::diagnosis(llm.clone())))
            .with(HandlerKind::Appointment, Arc::new(ChatHandler::appointment(llm.clone())))
            .with(HandlerKind::SmallTalk, Arc::new(ChatHandler::small_talk(llm)))
            .with(HandlerKind::OutOfTopic, Arc::new(StaticReplyHandler::out_of_topic()))
    }

    pub fn with(mut self, kind: HandlerKind, handler: Arc<dyn HandlerNode>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn get(&self, kind: HandlerKind) -> Option<&Arc<dyn HandlerNode>> {
        self.handlers.get(&kind)
    }

}

fn describe_slots(slots: &TopicSlots) -> Option<String> {
    let appointment = &slots.appointment;
    let fields = [
        ("person", slots.person_name.as_deref()),
        ("hospital", appointment.hospital_name.as_deref()),
        ("doctor", appointment.doctor_name.as_deref()),
        ("clinic", appointment.clinic.as_deref()),
        ("date", appointment.date.as_deref()),
        ("time", appointment.time.as_deref()),
    ];

    let mut lines: Vec<String> = fields
        .into_iter()
        .filter_map(|(label, value)| value.map(|value| format!("- {label}: {value}")))
        .collect();
    if !slots.symptoms.is_empty() {
        lines.push(format!("- symptoms: {}", slots.symptoms.join(", ")));
    }

    (!lines.is_empty()).then(|| lines.join("\n"))
}

const DIAGNOSIS_PROMPT: &str = "You are a medical triage assistant. Ask about the user's \
symptoms and work out which hospital clinic they should visit. Do not give a diagnosis or \
treatment advice; only name the clinic and the symptoms that point to it.
When you have settled on a clinic, add a line `CLINIC: <clinic name>`.
If the user agrees to book a visit, add a final line `HANDOFF: APPOINTMENT`.";

const APPOINTMENT_PROMPT: &str = "You are a hospital appointment assistant. Help the user \
book, move or cancel a visit. Ask for the missing details one at a time: hospital, clinic, \
doctor, date and time. Confirm the details back before finishing.";

const SMALL_TALK_PROMPT: &str = "You are the friendly front desk of a medical assistant. \
Answer the user's message kindly and briefly, and remind them that you can help with their \
health questions and hospital appointments.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Topic;
    use topicflow_ai::MockLlmClient;

    fn state_with(kind: HandlerKind) -> ConversationState {
        let mut state = ConversationState::new();
        state.topic_stack.push(Topic::new(Some(kind)));
        let patch = append_message(&state, Role::User, "my ear hurts").unwrap();
        state.apply(patch);
        state
    }

    #[tokio::test]
    async fn test_chat_handler_replies_under_active_topic() {
        let llm = Arc::new(MockLlmClient::from_replies("mock", ["Hello! How can I help?"]));
        let handler = ChatHandler::small_talk(llm.clone());
        let mut state = state_with(HandlerKind::SmallTalk);

        let patch = handler.run(&state).await.unwrap();
        state.apply(patch);

        assert_eq!(state.dialogue.len(), 2);
        assert_eq!(state.dialogue[1].role, Role::Assistant);
        assert_eq!(state.dialogue[1].content, "Hello! How can I help?");
        assert_eq!(state.dialogue[1].topic_id, state.topic_stack[0].id);
        assert_eq!(state.handoff, None);

        let requests = llm.recorded_requests().await;
        assert_eq!(requests[0].messages[0].role, Role::System);
        assert_eq!(requests[0].messages[1].content, "my ear hurts");
    }

    #[tokio::test]
    async fn test_diagnosis_records_clinic_and_hands_off() {
        let reply = "Your symptoms point to ENT.\nCLINIC: Otolaryngology\nHANDOFF: APPOINTMENT";
        let llm = Arc::new(MockLlmClient::from_replies("mock", [reply]));
        let handler = ChatHandler::diagnosis(llm);
        assert!(handler.supports_handoff());
        let mut state = state_with(HandlerKind::Diagnosis);

        let patch = handler.run(&state).await.unwrap();
        state.apply(patch);

        assert_eq!(state.handoff, Some(HandlerKind::Appointment));
        assert_eq!(
            state.topic_stack[0].slots.appointment.clinic.as_deref(),
            Some("Otolaryngology")
        );
        assert_eq!(state.dialogue[1].content, "Your symptoms point to ENT.");
    }

    #[tokio::test]
    async fn test_handoff_ignored_without_support() {
        let llm = Arc::new(MockLlmClient::from_replies("mock", ["Sure.\nHANDOFF: DIAGNOSIS"]));
        let handler = ChatHandler::appointment(llm);
        let mut state = state_with(HandlerKind::Appointment);

        let patch = handler.run(&state).await.unwrap();
        state.apply(patch);

        assert_eq!(state.handoff, None);
    }

    #[tokio::test]
    async fn test_static_reply() {
        let handler = StaticReplyHandler::out_of_topic();
        let mut state = state_with(HandlerKind::OutOfTopic);

        let patch = handler.run(&state).await.unwrap();
        state.apply(patch);

        assert_eq!(state.dialogue[1].content, OUT_OF_TOPIC_REPLY);
    }

    #[tokio::test]
    async fn test_handler_requires_active_topic() {
        let handler = StaticReplyHandler::out_of_topic();
        let err = handler.run(&ConversationState::new()).await.err().unwrap();
        assert!(matches!(err, FlowError::StateInvariantViolation(_)));
    }

    #[test]
    fn test_describe_slots() {
        let mut slots = TopicSlots::default();
        assert_eq!(describe_slots(&slots), None);

        slots.appointment.clinic = Some("Cardiology".to_string());
        slots.symptoms.push("chest pain".to_string());
        assert_eq!(
            describe_slots(&slots).as_deref(),
            Some("- clinic: Cardiology\n- symptoms: chest pain")
        );
    }
}

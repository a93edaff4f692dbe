//! Directive parsing for free-text model output.
//!
//! Decision nodes ask the model to finish with a single line such as
//! `FINAL ANSWER: SAME`. This module turns such text into a token from a
//! closed vocabulary, or a [`DirectiveFailure`] describing why it could not.
//! Identifier payloads are only accepted when they name a topic that exists
//! in the conversation, so unvalidated text never reaches the topic store.

use thiserror::Error;
use uuid::Uuid;

use crate::state::{ConversationState, HandlerKind, TopicId};

/// Marker introducing the final answer of a decision node.
pub const DECISION_MARKER: &str = "FINAL ANSWER";

/// Marker a handler uses to hand the conversation to another handler.
pub const HANDOFF_MARKER: &str = "HANDOFF";

/// Marker a handler uses to record the clinic a patient should visit.
pub const CLINIC_MARKER: &str = "CLINIC";

/// Why a piece of text did not yield a usable directive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectiveFailure {
    #[error("no directive line was found")]
    NoDirective,

    #[error("'{0}' is not a well-formed topic id")]
    MalformedReference(String),

    #[error("topic id {0} does not exist in this conversation")]
    UnknownTopicReference(TopicId),

    #[error("'{0}' is not one of the allowed answers")]
    UnrecognizedToken(String),
}

impl DirectiveFailure {
    /// Stable upper-case code for logs and prompts.
    pub fn code(&self) -> &'static str {
        match self {
            DirectiveFailure::NoDirective => "NO_DIRECTIVE",
            DirectiveFailure::MalformedReference(_) => "MALFORMED_REFERENCE",
            DirectiveFailure::UnknownTopicReference(_) => "UNKNOWN_TOPIC_REFERENCE",
            DirectiveFailure::UnrecognizedToken(_) => "UNRECOGNIZED_TOKEN",
        }
    }
}

/// A closed set of answers a decision may produce.
pub trait Vocabulary {
    type Token;

    /// Marker that introduces the directive line.
    const MARKER: &'static str = DECISION_MARKER;

    /// Only accept the marker at the start of a line, as `MARKER:`.
    const LINE_ANCHORED: bool = false;

    /// Match a normalized (trimmed, unwrapped, lower-case) payload.
    fn resolve(payload: &str, state: &ConversationState)
        -> Result<Self::Token, DirectiveFailure>;
}

/// Parse `text` against vocabulary `V`.
pub fn parse<V: Vocabulary>(
    text: &str,
    state: &ConversationState,
) -> Result<V::Token, DirectiveFailure> {
    let payload = if V::LINE_ANCHORED {
        extract_raw_payload(text, V::MARKER)
            .map(|raw| normalize(&raw))
            .filter(|payload| !payload.is_empty())
    } else {
        extract_payload(text, V::MARKER)
    };
    V::resolve(&payload.ok_or(DirectiveFailure::NoDirective)?, state)
}

/// Locate the last `marker` in `text` and return its normalized payload.
///
/// The marker is matched ASCII case-insensitively; an optional `:` after it
/// is skipped and the payload runs to the end of that line. Returns `None`
/// when the marker is missing or the payload is empty.
pub fn extract_payload(text: &str, marker: &str) -> Option<String> {
    let payload = normalize(directive_line(text, marker)?);
    (!payload.is_empty()).then_some(payload)
}

/// Payload of the last line that starts with `marker:`, trimmed but
/// otherwise untouched.
pub fn extract_raw_payload(text: &str, marker: &str) -> Option<String> {
    text.lines()
        .rev()
        .find_map(|line| line_payload(line, marker))
        .filter(|payload| !payload.is_empty())
        .map(str::to_string)
}

fn line_payload<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let line = line.trim_start();
    let head = line.get(..marker.len())?;
    if !head.eq_ignore_ascii_case(marker) {
        return None;
    }
    Some(line[marker.len()..].trim_start().strip_prefix(':')?.trim())
}

fn directive_line<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = find_last_marker(text, marker)?;
    let rest = &text[start + marker.len()..];
    let line = rest.split(['\n', '\r']).next().unwrap_or_default();
    let line = line.trim_start();
    Some(line.strip_prefix(':').unwrap_or(line))
}

/// Remove every line that starts with `marker:` and trim the result.
pub fn strip_directive_lines(text: &str, marker: &str) -> String {
    text.lines()
        .filter(|line| line_payload(line, marker).is_none())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn find_last_marker(text: &str, marker: &str) -> Option<usize> {
    // ASCII upper-casing keeps byte offsets identical to the original text.
    text.to_ascii_uppercase()
        .rfind(&marker.to_ascii_uppercase())
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let unwrapped = unwrap_once(trimmed, '{', '}')
        .or_else(|| unwrap_once(trimmed, '[', ']'))
        .unwrap_or(trimmed);
    unwrapped.trim().to_lowercase()
}

fn unwrap_once(text: &str, open: char, close: char) -> Option<&str> {
    text.strip_prefix(open)?.strip_suffix(close)
}

/// Keyword form of a payload: separators folded to `_`.
fn keyword(payload: &str) -> String {
    payload
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Parse a hyphenated UUID and check that it names a known topic.
pub fn resolve_topic_reference(
    payload: &str,
    state: &ConversationState,
) -> Result<TopicId, DirectiveFailure> {
    let malformed = || DirectiveFailure::MalformedReference(payload.to_string());
    if payload.len() != 36 {
        return Err(malformed());
    }
    let id = TopicId::from(Uuid::try_parse(payload).map_err(|_| malformed())?);
    if state.contains_topic(&id) {
        Ok(id)
    } else {
        Err(DirectiveFailure::UnknownTopicReference(id))
    }
}

/// Whether the message continues the active topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    Same,
    Different,
}

impl Vocabulary for Continuity {
    type Token = Continuity;

    fn resolve(payload: &str, _state: &ConversationState) -> Result<Continuity, DirectiveFailure> {
        match keyword(payload).as_str() {
            "same" | "same_topic" => Ok(Continuity::Same),
            "different" | "different_topic" => Ok(Continuity::Different),
            _ => Err(DirectiveFailure::UnrecognizedToken(payload.to_string())),
        }
    }
}

/// Which earlier topic, if any, the message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMatch {
    NewTopic,
    Existing(TopicId),
}

impl Vocabulary for HistoryMatch {
    type Token = HistoryMatch;

    fn resolve(payload: &str, state: &ConversationState) -> Result<HistoryMatch, DirectiveFailure> {
        if keyword(payload) == "new_topic" {
            return Ok(HistoryMatch::NewTopic);
        }
        resolve_topic_reference(payload, state).map(HistoryMatch::Existing)
    }
}

/// Handler choice for a brand-new topic.
pub struct Classification;

impl Vocabulary for Classification {
    type Token = HandlerKind;

    fn resolve(payload: &str, _state: &ConversationState) -> Result<HandlerKind, DirectiveFailure> {
        resolve_handler(payload)
    }
}

/// Handler named by a `HANDOFF:` line.
pub struct Handoff;

impl Vocabulary for Handoff {
    type Token = HandlerKind;
    const MARKER: &'static str = HANDOFF_MARKER;
    const LINE_ANCHORED: bool = true;

    fn resolve(payload: &str, _state: &ConversationState) -> Result<HandlerKind, DirectiveFailure> {
        resolve_handler(payload)
    }
}

fn resolve_handler(payload: &str) -> Result<HandlerKind, DirectiveFailure> {
    let word = keyword(payload);
    let word = word.strip_suffix("_agent").unwrap_or(&word);
    HandlerKind::ALL
        .into_iter()
        .find(|handler| handler.token().eq_ignore_ascii_case(word))
        .ok_or_else(|| DirectiveFailure::UnrecognizedToken(payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Topic;

    fn state_with_topic() -> (ConversationState, TopicId) {
        let mut state = ConversationState::new();
        let topic = Topic::new(Some(HandlerKind::Diagnosis));
        let id = topic.id;
        state.archive.push(topic);
        (state, id)
    }

    #[test]
    fn test_continuity_tokens() {
        let state = ConversationState::new();
        assert_eq!(
            parse::<Continuity>("FINAL ANSWER: SAME", &state),
            Ok(Continuity::Same)
        );
        assert_eq!(
            parse::<Continuity>("THOUGHT: new issue\nfinal answer: Different Topic", &state),
            Ok(Continuity::Different)
        );
        assert_eq!(
            parse::<Continuity>("no marker here", &state),
            Err(DirectiveFailure::NoDirective)
        );
        assert_eq!(
            parse::<Continuity>("FINAL ANSWER: maybe", &state),
            Err(DirectiveFailure::UnrecognizedToken("maybe".to_string()))
        );
    }

    #[test]
    fn test_braced_known_id_resolves() {
        let (state, id) = state_with_topic();
        let text = format!("FINAL ANSWER: {{{id}}}");
        assert_eq!(parse::<HistoryMatch>(&text, &state), Ok(HistoryMatch::Existing(id)));

        let upper = format!("FINAL ANSWER: [{}]", id.to_string().to_uppercase());
        assert_eq!(parse::<HistoryMatch>(&upper, &state), Ok(HistoryMatch::Existing(id)));
    }

    #[test]
    fn test_well_formed_but_absent_id_is_unknown_reference() {
        let (state, _) = state_with_topic();
        let result = parse::<HistoryMatch>(
            "FINAL ANSWER: ffffffff-0000-4000-8000-000000000000",
            &state,
        );
        assert!(matches!(
            result,
            Err(DirectiveFailure::UnknownTopicReference(_))
        ));
    }

    #[test]
    fn test_malformed_reference() {
        let (state, _) = state_with_topic();
        for text in [
            "FINAL ANSWER: 7c1e-not-a-uuid",
            "FINAL ANSWER: ffffffff00004000800000000000000000",
            "FINAL ANSWER: {ffffffff-0000-4000-8000-000000000000",
        ] {
            let result = parse::<HistoryMatch>(text, &state);
            assert!(
                matches!(result, Err(DirectiveFailure::MalformedReference(_))),
                "{text} -> {result:?}"
            );
        }
    }

    #[test]
    fn test_new_topic_spellings() {
        let state = ConversationState::new();
        for text in [
            "FINAL ANSWER: NEW_TOPIC",
            "FINAL ANSWER: new topic",
            "Final Answer:{NEW TOPIC}",
        ] {
            assert_eq!(parse::<HistoryMatch>(text, &state), Ok(HistoryMatch::NewTopic));
        }
    }

    #[test]
    fn test_last_marker_wins() {
        let state = ConversationState::new();
        let text = "THOUGHT: I must not print FINAL ANSWER: SAME yet\nFINAL ANSWER: DIFFERENT";
        assert_eq!(parse::<Continuity>(text, &state), Ok(Continuity::Different));
    }

    #[test]
    fn test_empty_payload_is_no_directive() {
        let state = ConversationState::new();
        assert_eq!(
            parse::<Continuity>("FINAL ANSWER:   \nSAME", &state),
            Err(DirectiveFailure::NoDirective)
        );
        assert_eq!(
            parse::<Continuity>("FINAL ANSWER: {}", &state),
            Err(DirectiveFailure::NoDirective)
        );
    }

    #[test]
    fn test_handler_tokens() {
        let state = ConversationState::new();
        let cases = [
            ("FINAL ANSWER: DIAGNOSIS", HandlerKind::Diagnosis),
            ("FINAL ANSWER: appointment_agent", HandlerKind::Appointment),
            ("FINAL ANSWER: {Small Talk}", HandlerKind::SmallTalk),
            ("FINAL ANSWER: out-of-topic", HandlerKind::OutOfTopic),
        ];
        for (text, expected) in cases {
            assert_eq!(parse::<Classification>(text, &state), Ok(expected));
        }
        assert!(matches!(
            parse::<Classification>("FINAL ANSWER: CARDIOLOGY", &state),
            Err(DirectiveFailure::UnrecognizedToken(_))
        ));
    }

    #[test]
    fn test_handoff_uses_its_own_marker() {
        let state = ConversationState::new();
        let reply = "Please see an ENT specialist.\nHANDOFF: APPOINTMENT";
        assert_eq!(parse::<Handoff>(reply, &state), Ok(HandlerKind::Appointment));
        assert_eq!(
            parse::<Handoff>("FINAL ANSWER: APPOINTMENT", &state),
            Err(DirectiveFailure::NoDirective)
        );
        assert_eq!(
            strip_directive_lines(reply, HANDOFF_MARKER),
            "Please see an ENT specialist."
        );
    }

    #[test]
    fn test_handoff_ignores_marker_in_prose() {
        let state = ConversationState::new();
        let reply = "HANDOFF: APPOINTMENT\nThe handoff is arranged.";
        assert_eq!(parse::<Handoff>(reply, &state), Ok(HandlerKind::Appointment));
        assert_eq!(
            parse::<Handoff>("I will arrange a handoff: appointment desk next.", &state),
            Err(DirectiveFailure::NoDirective)
        );
        assert_eq!(strip_directive_lines(reply, HANDOFF_MARKER), "The handoff is arranged.");
    }

    #[test]
    fn test_raw_payload_keeps_case() {
        let reply = "You should visit ENT.\nCLINIC: Kulak Burun Bogaz";
        assert_eq!(
            extract_raw_payload(reply, CLINIC_MARKER).as_deref(),
            Some("Kulak Burun Bogaz")
        );
        assert_eq!(extract_raw_payload("CLINIC:   ", CLINIC_MARKER), None);
        assert_eq!(
            extract_raw_payload("The clinic opens at nine.", CLINIC_MARKER),
            None
        );
    }

    #[test]
    fn test_failure_codes() {
        assert_eq!(DirectiveFailure::NoDirective.code(), "NO_DIRECTIVE");
        assert_eq!(
            DirectiveFailure::UnknownTopicReference(TopicId::new()).code(),
            "UNKNOWN_TOPIC_REFERENCE"
        );
    }
}

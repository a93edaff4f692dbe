//! Instruction payloads for the three decision nodes.

use crate::state::HandlerKind;

const PREAMBLE: &str = "You are part of an assistant that helps users with medical conditions \
get diagnosed and book hospital appointments.";

/// Short user turn sent after every decision prompt.
pub const ANSWER_NUDGE: &str = "Follow the instruction above and answer.";

pub fn continuity_prompt(message: &str, dialog: &str, scratch: &str) -> String {
    format!(
        r#"{PREAMBLE}

TASK
Decide whether the latest user input continues the current topic.

USER INPUT
{message}

CURRENT TOPIC MESSAGES (oldest first)
{dialog}

RULES
- SAME TOPIC when the input adds details, answers a question, corrects or follows up on the
  same problem, appointment, test or medication, or is a brief acknowledgement.
- DIFFERENT TOPIC when it introduces a new issue or person, switches to an unrelated task,
  is small talk, or carries an explicit change signal.
- When the link is unclear, answer DIFFERENT TOPIC.

OUTPUT
You may reason first on lines starting with THOUGHT:.
Finish with exactly one of:
FINAL ANSWER: SAME TOPIC
FINAL ANSWER: DIFFERENT TOPIC

YOUR EARLIER ATTEMPTS
{scratch}
"#
    )
}

pub fn history_prompt(message: &str, dialog: &str, topic_ids: &[String], scratch: &str) -> String {
    let known = topic_ids.join("\n");
    format!(
        r#"{PREAMBLE}

TASK
Attribute the latest user input to one existing topic, or declare a new topic.

USER INPUT
{message}

DIALOG WITH TOPIC TAGS (oldest first)
{dialog}

KNOWN TOPIC IDS
{known}

RULES
- Pick a topic when the input clearly continues it: same condition, appointment, clinician,
  date or test, including references through pronouns.
- Do not attach bare acknowledgements such as "ok" or "thanks" to an earlier topic.
- If several topics match, prefer the strongest overlap, then the most recent one.
- Never invent an id. Copy it exactly from the list above.
- When unsure, answer NEW TOPIC.

OUTPUT
You may reason first on lines starting with THOUGHT:.
Finish with exactly one of:
FINAL ANSWER: <topic id>
FINAL ANSWER: NEW TOPIC

YOUR EARLIER ATTEMPTS
{scratch}
"#
    )
}

pub fn classification_prompt(message: &str, scratch: &str) -> String {
    let handlers = HandlerKind::ALL
        .iter()
        .map(|handler| format!("- {}: {}", handler.token(), scope(*handler)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"{PREAMBLE}

TASK
A new topic has started. Based only on the latest user input, choose the handler for it.

USER INPUT
{message}

HANDLERS
{handlers}

OUTPUT
You may reason first on lines starting with THOUGHT:.
Finish with exactly one line:
FINAL ANSWER: <HANDLER>

YOUR EARLIER ATTEMPTS
{scratch}
"#
    )
}

fn scope(handler: HandlerKind) -> &'static str {
    match handler {
        HandlerKind::Diagnosis => {
            "symptoms, medical problems, test results, treatment or medication questions"
        }
        HandlerKind::Appointment => {
            "booking, moving, confirming or cancelling visits, tests and other visit logistics"
        }
        HandlerKind::SmallTalk => "greetings, thanks, jokes, questions about the assistant itself",
        HandlerKind::OutOfTopic => "anything unrelated to healthcare",
    }
}

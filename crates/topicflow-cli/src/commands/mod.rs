pub mod chat;
pub mod turn;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use topicflow_ai::{LlmClient, MockLlmClient, OpenAIClient, Role};
use topicflow_core::store::check_topic_ids;
use topicflow_core::{ConversationState, DialogueMessage, TurnRunner};
use tracing::info;

use crate::config::CliConfig;
use crate::output::OutputFormat;

/// Global flags shared by every command.
pub struct RuntimeOptions {
    pub model: Option<String>,
    pub script: Option<PathBuf>,
    pub format: OutputFormat,
}

/// Build the model client: scripted when `--script` is given, HTTP otherwise.
pub fn build_llm(config: &CliConfig, options: &RuntimeOptions) -> Result<Arc<dyn LlmClient>> {
    if let Some(path) = &options.script {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        let replies: Vec<String> = serde_json::from_str(&content)
            .with_context(|| format!("Script {} must be a JSON array of strings", path.display()))?;
        info!(replies = replies.len(), script = %path.display(), "Using scripted model");
        return Ok(Arc::new(MockLlmClient::from_replies("scripted", replies).strict()));
    }

    let Some(api_key) = config.openai_api_key() else {
        bail!("No OpenAI API key configured");
    };
    let mut client = OpenAIClient::new(api_key)?.with_retry_policy(config.retry.clone());
    if let Some(model) = options.model.as_ref().or(config.default.model.as_ref()) {
        client = client.with_model(model.clone());
    }
    if let Some(base_url) = &config.default.base_url {
        client = client.with_base_url(base_url.clone());
    }
    Ok(Arc::new(client))
}

pub fn build_runner(config: &CliConfig, options: &RuntimeOptions) -> Result<TurnRunner> {
    let llm = build_llm(config, options)?;
    let handlers = topicflow_core::HandlerSet::defaults(llm.clone());
    Ok(TurnRunner::new(llm, handlers, config.flow.clone())?)
}

/// Read a saved conversation; a missing file starts a new one.
pub fn load_state(path: &Path) -> Result<ConversationState> {
    if !path.exists() {
        return Ok(ConversationState::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let state: ConversationState = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid conversation file", path.display()))?;
    check_topic_ids(&state)
        .with_context(|| format!("{} is not a valid conversation file", path.display()))?;
    Ok(state)
}

pub fn save_state(path: &Path, state: &ConversationState) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(state)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Print assistant replies produced in a turn.
pub fn print_replies(appended: &[DialogueMessage]) {
    for message in appended.iter().filter(|m| m.role == Role::Assistant) {
        println!("{} {}", "assistant>".green().bold(), message.content);
    }
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "topicflow")]
#[command(version, about = "TopicFlow - topic-scoped dialogue orchestration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Model name (defaults to the config file, then gpt-4o-mini)
    #[arg(long, global = true, env = "TOPICFLOW_MODEL")]
    pub model: Option<String>,

    /// JSON file with an array of scripted model replies; replaces the HTTP client
    #[arg(long, global = true)]
    pub script: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive conversation
    Chat(ChatArgs),

    /// Run a single turn against a saved conversation
    Turn(TurnArgs),
}

#[derive(Args)]
pub struct ChatArgs {
    /// Conversation file to resume from and save to on exit
    #[arg(long)]
    pub state: Option<PathBuf>,
}

#[derive(Args)]
pub struct TurnArgs {
    /// Conversation file (created if missing)
    #[arg(long)]
    pub state: PathBuf,

    /// The user message
    pub message: String,
}

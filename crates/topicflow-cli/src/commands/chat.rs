use anyhow::Result;
use colored::Colorize;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use topicflow_core::ConversationState;

use crate::cli::ChatArgs;
use crate::commands::{RuntimeOptions, build_runner, load_state, print_replies, save_state};
use crate::config::CliConfig;
use crate::output::{json::print_json, table};

const HELP: &str = "Commands: /topics shows the topic stack, /quit saves and exits.";

pub async fn run(config: &CliConfig, options: &RuntimeOptions, args: ChatArgs) -> Result<()> {
    let runner = build_runner(config, options)?;
    let mut state = match &args.state {
        Some(path) => load_state(path)?,
        None => ConversationState::new(),
    };

    println!("{}", "TopicFlow chat".bold());
    println!("{}", HELP.dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you>".cyan().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/topics" => {
                println!("{}", table::topics_table(&state));
                continue;
            }
            _ => {}
        }

        match runner.run_turn(&mut state, input).await {
            Ok(appended) => {
                print_replies(&appended);
                print_stack(&state);
            }
            // The failed turn left the conversation untouched; keep going.
            Err(err) => eprintln!("{} {}", "Turn failed:".red().bold(), err),
        }
    }

    if let Some(path) = &args.state {
        save_state(path, &state)?;
        println!("{} {}", "Saved conversation to".dimmed(), path.display());
    }
    if options.format.is_json() {
        print_json(&state)?;
    }
    Ok(())
}

/// One-line stack summary, active topic last.
fn print_stack(state: &ConversationState) {
    let stack = state
        .topic_stack
        .iter()
        .map(|topic| {
            let handler = topic
                .handler
                .map(|handler| handler.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!("{handler}:{}", table::short_id(&topic.id.to_string()))
        })
        .collect::<Vec<_>>()
        .join(" > ");
    println!("{} [{}]", "stack".dimmed(), stack);
}

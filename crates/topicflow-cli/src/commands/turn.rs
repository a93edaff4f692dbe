use anyhow::Result;
use serde::Serialize;
use topicflow_core::{ConversationState, DialogueMessage};

use crate::cli::TurnArgs;
use crate::commands::{RuntimeOptions, build_runner, load_state, print_replies, save_state};
use crate::config::CliConfig;
use crate::output::{json::print_json, table};

#[derive(Serialize)]
struct TurnOutput<'a> {
    appended: &'a [DialogueMessage],
    state: &'a ConversationState,
}

pub async fn run(config: &CliConfig, options: &RuntimeOptions, args: TurnArgs) -> Result<()> {
    let runner = build_runner(config, options)?;
    let mut state = load_state(&args.state)?;

    let appended = runner.run_turn(&mut state, args.message).await?;
    save_state(&args.state, &state)?;

    if options.format.is_json() {
        return print_json(&TurnOutput {
            appended: &appended,
            state: &state,
        });
    }

    print_replies(&appended);
    println!("{}", table::topics_table(&state));
    Ok(())
}

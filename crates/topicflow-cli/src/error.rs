use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = err.to_string().to_lowercase();

    if msg.contains("no openai api key") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Export OPENAI_API_KEY, add it under [api_keys] in the config file,");
        eprintln!("  or run offline with:");
        eprintln!("  {} topicflow --script replies.json chat", "$".dimmed());
    }

    if msg.contains("gave up after") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  The model never produced a valid FINAL ANSWER line.");
        eprintln!("  Raise [flow] max_decision_attempts or try a stronger model.");
    }

    if msg.contains("invalid flow configuration") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Raise [flow] max_graph_steps or lower max_decision_attempts.");
    }

    if msg.contains("connection refused") || msg.contains("network") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check your internet connection and try again.");
    }

    std::process::exit(1);
}

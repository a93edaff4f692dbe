mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        error::handle_error(err);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = config::CliConfig::load();
    let options = commands::RuntimeOptions {
        model: cli.model,
        script: cli.script,
        format: cli.format,
    };

    match cli.command {
        Commands::Chat(args) => commands::chat::run(&config, &options, args).await,
        Commands::Turn(args) => commands::turn::run(&config, &options, args).await,
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "topicflow=debug" } else { "topicflow=info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so `--format json` output stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();
}

//! taskwright CLI - run a goal-directed web-automation agent.

mod cli;
mod commands;
mod error;
mod output;
mod utils;

use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
pub use error::CliError;

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{} failed to start async runtime: {e}", "✗".red());
            std::process::exit(1);
        }
    };

    let exit_code = rt.block_on(run_command(cli));
    std::process::exit(exit_code);
}

async fn run_command(cli: Cli) -> i32 {
    let result = tokio::select! {
        result = dispatch(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{} interrupted", "✗".yellow());
            return 130;
        }
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {e}", "✗".red());
            1
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Run {
            url,
            task,
            workers,
            headless,
        } => commands::run::run(&url, &task, workers, headless, cli.config.as_deref()).await,
    }
}

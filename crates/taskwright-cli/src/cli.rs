//! CLI command definitions using clap.

use clap::Parser;

/// taskwright - run an autonomous web-automation agent against a single goal
#[derive(Parser)]
#[command(name = "taskwright")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (toml/yaml/json); falls back to defaults
    #[arg(short = 'c', long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a goal against a starting URL
    Run {
        /// Starting URL for the browser session
        #[arg(long)]
        url: String,

        /// Natural-language description of the task to accomplish
        #[arg(long)]
        task: String,

        /// Number of concurrent workers
        #[arg(long)]
        workers: Option<u32>,

        /// Run the browser headless
        #[arg(long)]
        headless: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn run_subcommand_parses_required_flags() {
        let parsed = Cli::try_parse_from([
            "taskwright",
            "run",
            "--url",
            "https://example.com",
            "--task",
            "find the pricing page",
        ]);
        assert!(parsed.is_ok(), "run --url --task should parse");
    }

    #[test]
    fn run_subcommand_accepts_workers_and_headless() {
        let parsed = Cli::try_parse_from([
            "taskwright",
            "run",
            "--url",
            "https://example.com",
            "--task",
            "find the pricing page",
            "--workers",
            "4",
            "--headless",
        ]);
        assert!(parsed.is_ok(), "run should accept --workers and --headless");
    }

    #[test]
    fn run_subcommand_requires_url_and_task() {
        let parsed = Cli::try_parse_from(["taskwright", "run"]);
        assert!(parsed.is_err(), "run without --url/--task should fail to parse");
    }
}

//! sleuth CLI: the main entry point.
//!
//! Commands:
//! - `search`   Find the code relevant to a question
//! - `onboard`  Write a default config
//! - `config`   Show, locate or validate the config

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(
    name = "sleuth",
    about = "sleuth: an LLM agent that searches your codebase",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the project for code relevant to a question
    Search {
        /// The question to answer
        query: String,

        /// Files to evaluate as initial context before searching
        #[arg(long = "context", value_name = "FILE")]
        context: Vec<PathBuf>,

        /// Project root (overrides `project.root` in the config)
        #[arg(long, value_name = "DIR")]
        root: Option<PathBuf>,

        /// Only print the outcome
        #[arg(short, long)]
        quiet: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    Onboard,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration, secrets redacted
    Show,
    /// Print the config file location
    Path,
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Search {
            query,
            context,
            root,
            quiet,
            json,
        } => {
            commands::search::run(commands::search::SearchArgs {
                query,
                context,
                root,
                quiet,
                json,
            })
            .await
        }
        Commands::Onboard => commands::onboard::run().map(|_| ExitCode::SUCCESS),
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show(),
            ConfigAction::Path => commands::config_cmd::path(),
            ConfigAction::Validate => commands::config_cmd::validate(),
        }
        .map(|_| ExitCode::SUCCESS),
    }
}

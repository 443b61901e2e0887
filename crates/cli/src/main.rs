//! LeadScout CLI — the main entry point.
//!
//! Commands:
//! - `onboard` — Initialize configuration
//! - `run`     — Execute a research run for a goal
//! - `models`  — List models available upstream

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "leadscout",
    about = "LeadScout — autonomous sales-lead research agent",
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
    /// Initialize configuration
    Onboard,

    /// Run the research loop for a goal
    Run {
        /// The research goal, e.g. "Research https://acme.com and summarize the team"
        #[arg(short, long)]
        goal: String,

        /// Path to an alternate config file
        #[arg(short, long)]
        config: Option<std::path::PathBuf>,
    },

    /// List models available from the upstream provider
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Run { goal, config } => commands::run::run(&goal, config.as_deref()).await?,
        Commands::Models => commands::models::run().await?,
    }

    Ok(())
}

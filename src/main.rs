mod commands;
mod logging;
mod server;
mod singleton;
mod tui;

use std::path::PathBuf;

use anyhow::Result;
use calmirror_core::SyncConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "calmirror")]
#[command(about = "Mirror a Google Calendar and a Discord server's scheduled events")]
struct Cli {
    /// Config file (default: ~/.config/calmirror/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mirror until interrupted
    Run,
    /// Run a single reconciliation pass and exit
    Reconcile {
        /// Print the pass report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the stored mappings
    Status,
    /// Write a config file to fill in
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Init => commands::init::run(cli.config.as_deref()),
        Commands::Status => {
            let config = SyncConfig::load_unchecked(cli.config.as_deref())?;
            commands::status::run(&config).await
        }
        Commands::Reconcile { json } => commands::reconcile::run(&load_config(&cli.config)?, json).await,
        Commands::Run => commands::run::run(&load_config(&cli.config)?).await,
    }
}

fn load_config(path: &Option<PathBuf>) -> Result<SyncConfig> {
    SyncConfig::load(path.as_deref()).map_err(|e| {
        anyhow::anyhow!(
            "{e}\n\n\
            Create a config file with:\n  \
            calmirror init"
        )
    })
}

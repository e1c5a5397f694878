//! hindsight - retroactive audio recorder.
//!
//! Continuously captures the input into a rolling buffer; on trigger,
//! saves the last 13 seconds plus everything that follows, and
//! optionally sends the file off for transcription.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use hindsight::{app, ipc};
use hindsight_core::{ConfigManager, DEFAULT_LOG_LEVEL};

#[derive(Parser)]
#[command(name = "hindsight", version, about = "Retroactive audio recorder")]
struct Cli {
    /// Signal the running instance to toggle recording, then exit.
    #[arg(long)]
    toggle: bool,

    /// Use an alternate configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Toggle mode delivers the trigger to a running instance and exits;
    // it never touches audio or logging.
    if cli.toggle {
        return ipc::send_toggle();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("HINDSIGHT_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .init();

    let manager = match cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let config = manager.load()?;
    // Save back so a fresh install gets a file to edit.
    manager.save(&config)?;

    app::run(config)
}

//! sage-mem - Sage Memory Maintenance CLI
//!
//! Inspect, sweep and persist the local memory store used by the Sage
//! voice assistant.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("sage_mem=info".parse()?)
                .add_directive("sage_memory=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = config::Config::load(cli.config.as_deref(), cli.data_dir.clone())?;

    // Execute command
    match cli.command {
        Commands::Memory(cmd) => commands::memory::execute(cmd, &config, cli.json).await,
        Commands::Sweep { no_save } => commands::maintenance::sweep(&config, no_save, cli.json).await,
        Commands::Watch { interval_secs } => commands::maintenance::watch(&config, interval_secs).await,
        Commands::Config(cmd) => commands::maintenance::config(cmd, &config),
        Commands::Version => {
            println!("sage-mem {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

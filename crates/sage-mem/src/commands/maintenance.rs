//! Maintenance commands: decay sweeps, the watch loop and configuration.

use std::time::Duration;

use anyhow::{Result, bail};
use colored::Colorize;

use super::{open_memory, print_json};
use crate::cli::{ConfigAction, ConfigCommand};
use crate::config::Config;

/// Run one decay sweep now
pub async fn sweep(config: &Config, no_save: bool, json: bool) -> Result<()> {
    let memory = open_memory(config).await?;
    let report = memory.store().decay_sweep();

    if json {
        print_json(&report)?;
    } else if report.has_changes() {
        println!(
            "{} Swept {} memories in {}ms",
            "✓".green(),
            report.examined,
            report.duration_ms
        );
        println!("  Lowered salience: {}", report.lowered);
        println!("  Removed (stale):  {}", report.removed.to_string().yellow());
        println!("  Removed (over capacity): {}", report.trimmed.to_string().yellow());
    } else {
        println!("{} Swept {} memories, nothing changed", "✓".green(), report.examined);
    }

    if no_save {
        return Ok(());
    }
    super::finish(memory).await
}

/// Run maintenance every `interval_secs` until Ctrl-C
pub async fn watch(config: &Config, interval_secs: u64) -> Result<()> {
    if interval_secs == 0 {
        bail!("--interval-secs must be greater than 0");
    }

    let mut memory = open_memory(config).await?;
    memory.start();
    println!(
        "{} Watching {} every {}s (Ctrl-C to stop)",
        "▶".cyan(),
        memory.persistence().describe(),
        interval_secs
    );

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    let mut reported = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                memory.run_maintenance();
                memory.wait_idle().await;

                let warnings = memory.warnings();
                for warning in warnings.iter().skip(reported) {
                    println!("{} {}", "⚠".yellow(), warning);
                }
                reported = warnings.len();

                let stats = memory.stats();
                tracing::info!(
                    short_term = stats.short_term_count,
                    long_term = stats.long_term_count,
                    "maintenance run finished"
                );
            }
            _ = &mut ctrl_c => {
                println!();
                println!("{} Stopping...", "■".cyan());
                break;
            }
        }
    }

    let report = memory.shutdown().await?;
    println!(
        "{} Stopped ({} jobs completed, {} cancelled)",
        "✓".green(),
        report.completed,
        report.cancelled
    );
    Ok(())
}

/// Execute config command.
pub fn config(cmd: ConfigCommand, config: &Config) -> Result<()> {
    match cmd.action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(&config.sage)?);
        }
        ConfigAction::Path => {
            println!("Config: {}", config.config_path.display());
            println!("Data:   {}", config.data_dir.display());
            println!("Store:  {}", config.storage_path().display());
        }
        ConfigAction::Init { force } => {
            if config.config_path.exists() && !force {
                bail!(
                    "Config file already exists: {} (use --force to overwrite)",
                    config.config_path.display()
                );
            }
            config.save()?;
            println!("{} Wrote {}", "✓".green(), config.config_path.display());
        }
    }
    Ok(())
}

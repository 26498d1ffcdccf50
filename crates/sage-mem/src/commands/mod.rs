//! Command implementations for sage-mem.
//!
//! Each submodule implements the logic for a command group.

pub mod maintenance;
pub mod memory;

use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use sage_memory::persistence::open_store;
use sage_memory::{Embedder, HeuristicSalience, MemoryEntry, SageMemory, Tier};

use crate::config::Config;

/// Open the memory system described by `config`
pub async fn open_memory(config: &Config) -> Result<SageMemory> {
    let persistence = open_store(&config.sage, &config.data_dir)
        .with_context(|| format!("Failed to open snapshot store at {}", config.storage_path().display()))?;
    let salience = Arc::new(HeuristicSalience::from_config(&config.sage.memory));

    SageMemory::open(config.sage.clone(), embedder(), salience, persistence)
        .await
        .context("Failed to load memory snapshot")
}

#[cfg(feature = "embeddings")]
fn embedder() -> Arc<dyn Embedder> {
    Arc::new(sage_memory::FastEmbedder::new())
}

#[cfg(not(feature = "embeddings"))]
fn embedder() -> Arc<dyn Embedder> {
    Arc::new(sage_memory::HashingEmbedder::default())
}

/// Apply queued background work, then save and close
pub async fn finish(memory: SageMemory) -> Result<()> {
    memory.run_pending().await?;
    let report = memory.shutdown().await.context("Failed to save memory snapshot")?;
    for warning in &report.warnings {
        println!("{} {}", "⚠".yellow(), warning);
    }
    Ok(())
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn tier_display(tier: Tier) -> &'static str {
    match tier {
        Tier::ShortTerm => "short-term",
        Tier::LongTerm => "long-term",
    }
}

pub fn print_entry(index: usize, entry: &MemoryEntry) {
    let tier = match entry.tier {
        Tier::ShortTerm => tier_display(entry.tier).yellow(),
        Tier::LongTerm => tier_display(entry.tier).green(),
    };
    println!(
        "  {}. [{}] {} {}",
        index + 1,
        tier,
        entry.role.label().bold(),
        entry.id.to_string().dimmed()
    );
    println!("     {}", entry.text);
    println!(
        "     salience {:.2} · accessed {}x · {}",
        entry.salience,
        entry.access_count,
        if entry.is_indexed() { "indexed" } else { "not indexed" }
    );
    if !entry.tags.is_empty() {
        println!("     Tags: {}", entry.tags.join(", ").dimmed());
    }
}

//! Memory commands for inspecting and editing the local store.
//!
//! Every command opens the snapshot, applies its change, drains the jobs it
//! queued and saves before exiting. No long-running process is required.

use anyhow::{Result, bail};
use colored::Colorize;
use sage_memory::{EntryId, PromoteOutcome, SageMemory, SearchFilter, Tier};

use super::{finish, open_memory, print_entry, print_json, tier_display};
use crate::cli::{MemoryAction, MemoryCommand};
use crate::config::Config;

/// Execute memory command.
pub async fn execute(cmd: MemoryCommand, config: &Config, json: bool) -> Result<()> {
    let memory = open_memory(config).await?;

    match cmd.action {
        MemoryAction::Record { text, role, tags } => {
            let entry = memory.record_turn_as(role.into(), &text, tags)?;
            memory.run_pending().await?;
            let entry = memory.store().get(&entry.id).unwrap_or(entry);

            if json {
                print_json(&entry)?;
            } else {
                println!("{} Recorded in {} memory", "✓".green(), tier_display(entry.tier).cyan());
                println!("  ID: {}", entry.id);
                println!("  Salience: {:.2}", entry.salience);
            }
        }

        MemoryAction::Assemble { query, budget } => {
            let bundle = memory.assemble(&query, budget).await?;
            if json {
                print_json(&bundle)?;
            } else if bundle.is_empty() {
                println!("{} Nothing fits in {} tokens", "⚠".yellow(), budget);
            } else {
                println!(
                    "{} {} memories, {}/{} tokens:",
                    "✓".green(),
                    bundle.len(),
                    bundle.token_count,
                    budget
                );
                println!();
                println!("{}", bundle.render());
            }
        }

        MemoryAction::Query { query, k } => {
            let ranked = memory.query_relevant(&query, k).await?;
            if json {
                print_json(&ranked)?;
            } else if ranked.is_empty() {
                println!("{} No memories found", "⚠".yellow());
            } else {
                println!("{} Top {} memories:", "✓".green(), ranked.len());
                println!();
                for (i, r) in ranked.iter().enumerate() {
                    print_entry(i, &r.entry);
                    println!("     score {:.3} ({:?})", r.score, r.source);
                }
            }
        }

        MemoryAction::Search {
            text,
            tier,
            role,
            tag,
            limit,
        } => {
            let filter = SearchFilter {
                text,
                tag,
                role: role.map(Into::into),
                tier: tier.map(Into::into),
                limit: Some(limit),
            };
            let entries = memory.store().search(&filter);
            if json {
                print_json(&entries)?;
            } else if entries.is_empty() {
                println!("{} No memories found matching criteria", "⚠".yellow());
            } else {
                println!("{} Found {} memories:", "✓".green(), entries.len());
                println!();
                for (i, entry) in entries.iter().enumerate() {
                    print_entry(i, entry);
                }
            }
        }

        MemoryAction::Show { id } => {
            let id = parse_id(&id)?;
            match memory.store().get(&id) {
                Some(entry) if json => print_json(&entry)?,
                Some(entry) => {
                    print_entry(0, &entry);
                    println!("     Created: {}", entry.created_at.to_rfc3339());
                    println!("     Last accessed: {}", entry.last_accessed.to_rfc3339());
                }
                None => bail!("Memory not found: {}", id),
            }
        }

        MemoryAction::Promote { id } => {
            let id = parse_id(&id)?;
            match memory.store().promote(id).await? {
                PromoteOutcome::Promoted { indexed } => {
                    println!("{} Promoted to {} memory", "✓".green(), tier_display(Tier::LongTerm).cyan());
                    if !indexed {
                        println!("  {} Not indexed yet; queued for embedding", "⚠".yellow());
                    }
                }
                PromoteOutcome::AlreadyLongTerm => {
                    println!("{} Already in long-term memory", "⚠".yellow());
                }
                PromoteOutcome::NotFound | PromoteOutcome::BelowThreshold => {
                    bail!("Memory not found in short-term memory: {}", id)
                }
            }
        }

        MemoryAction::Transcript { limit } => {
            let transcript = memory.store().recent_transcript(limit);
            if json {
                print_json(&transcript)?;
            } else if transcript.is_empty() {
                println!("{} Short-term memory is empty", "⚠".yellow());
            } else {
                println!("{}", transcript);
            }
        }

        MemoryAction::Clear => {
            let cleared = memory.store().clear_short_term();
            println!("{} Cleared {} short-term memories", "✓".green(), cleared);
        }

        MemoryAction::Stats => stats(&memory, json)?,
    }

    finish(memory).await
}

fn stats(memory: &SageMemory, json: bool) -> Result<()> {
    let stats = memory.stats();
    if json {
        return print_json(&stats);
    }

    println!("{} Memory Statistics", "📊".cyan());
    println!();
    println!("  Store: {}", memory.persistence().describe());
    println!("  Total memories: {}", stats.total().to_string().bold());
    println!();
    println!("  By tier:");
    println!(
        "    Short-term: {} (avg salience {:.2})",
        stats.short_term_count.to_string().yellow(),
        stats.avg_salience_short_term
    );
    println!(
        "    Long-term:  {} (avg salience {:.2})",
        stats.long_term_count.to_string().green(),
        stats.avg_salience_long_term
    );
    println!();
    println!("  Indexed: {}", stats.indexed_count);
    if stats.unindexed_long_term > 0 {
        println!(
            "  {} {} long-term memories waiting for an embedding",
            "⚠".yellow(),
            stats.unindexed_long_term
        );
    }
    Ok(())
}

fn parse_id(id: &str) -> Result<EntryId> {
    match EntryId::parse(id) {
        Some(id) => Ok(id),
        None => bail!("Invalid memory ID: {}", id),
    }
}

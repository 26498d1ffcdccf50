//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sage_memory::{Role, Tier};

/// Sage memory maintenance CLI
#[derive(Parser, Debug)]
#[command(name = "sage-mem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Data directory holding the snapshot and config.toml
    #[arg(long, global = true, env = "SAGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Config file (default: <data-dir>/config.toml)
    #[arg(long, global = true, env = "SAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and edit stored memories
    Memory(MemoryCommand),

    /// Run one decay sweep and save a snapshot
    Sweep {
        /// Report what the sweep did without saving the result
        #[arg(long)]
        no_save: bool,
    },

    /// Keep running maintenance on an interval until interrupted
    Watch {
        /// Seconds between maintenance runs
        #[arg(short, long, default_value = "300")]
        interval_secs: u64,
    },

    /// Configuration management
    Config(ConfigCommand),

    /// Show version information
    Version,
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct MemoryCommand {
    #[command(subcommand)]
    pub action: MemoryAction,
}

#[derive(Subcommand, Debug)]
pub enum MemoryAction {
    /// Record a conversation turn
    Record {
        /// Turn text
        text: String,

        /// Speaker
        #[arg(short, long, value_enum, default_value = "user")]
        role: RoleArg,

        /// Tags for categorization
        #[arg(short = 'T', long = "tag", action = clap::ArgAction::Append)]
        tags: Vec<String>,
    },

    /// Build the context bundle for a query
    Assemble {
        /// Query text
        query: String,

        /// Token budget
        #[arg(short, long, default_value = "512")]
        budget: usize,
    },

    /// Rank the most relevant memories for a query
    Query {
        /// Query text
        query: String,

        /// Maximum results
        #[arg(short, default_value = "5")]
        k: usize,
    },

    /// Search memories by text, tag, role or tier
    Search {
        /// Case-insensitive text to look for
        text: Option<String>,

        /// Filter by tier
        #[arg(short, long, value_enum)]
        tier: Option<TierArg>,

        /// Filter by speaker
        #[arg(short, long, value_enum)]
        role: Option<RoleArg>,

        /// Filter by tag
        #[arg(short = 'T', long)]
        tag: Option<String>,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show one memory
    Show {
        /// Memory ID
        id: String,
    },

    /// Move a short-term memory to long-term regardless of salience
    Promote {
        /// Memory ID
        id: String,
    },

    /// Print the recent short-term transcript
    Transcript {
        /// Number of turns
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Drop every short-term memory
    Clear,

    /// Show memory statistics
    Stats,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum RoleArg {
    User,
    Assistant,
    System,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => Role::User,
            RoleArg::Assistant => Role::Assistant,
            RoleArg::System => Role::System,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum TierArg {
    Short,
    Long,
}

impl From<TierArg> for Tier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Short => Tier::ShortTerm,
            TierArg::Long => Tier::LongTerm,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Print config and data locations
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_record_with_tags() {
        let cli = Cli::try_parse_from([
            "sage-mem", "memory", "record", "hello", "--role", "assistant", "-T", "a", "-T", "b",
        ])
        .unwrap();
        match cli.command {
            Commands::Memory(MemoryCommand {
                action: MemoryAction::Record { text, role, tags },
            }) => {
                assert_eq!(text, "hello");
                assert_eq!(Role::from(role), Role::Assistant);
                assert_eq!(tags, vec!["a", "b"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_json_flag() {
        let cli = Cli::try_parse_from(["sage-mem", "memory", "stats", "--json"]).unwrap();
        assert!(cli.json);
    }
}

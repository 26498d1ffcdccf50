//! Sage Memory - Tiered Conversational Memory
//!
//! Gives a voice assistant continuity across turns and sessions. Recent
//! turns live in a bounded short-term buffer; salient ones are promoted to
//! an embedding-indexed long-term store; a background scheduler handles
//! promotion, decay, persistence and cache warming off the conversation
//! path.
//!
//! # Modules
//!
//! - **embedding** - `Embedder` trait and the nearest-neighbour `EmbeddingIndex`
//! - **salience** - pluggable salience scoring and decay
//! - **store** - short-term buffer and long-term store
//! - **context** - token-budgeted context bundles
//! - **scheduler** - priority job queue and worker pool
//! - **persistence** - SQLite and JSON snapshot stores
//! - **system** - `SageMemory`, the assembled instance
//!
//! # Example
//!
//! ```rust,no_run
//! use sage_memory::{SageConfig, SageMemory};
//!
//! async fn example() -> sage_memory::MemoryResult<()> {
//!     let mut memory = SageMemory::open_in(SageConfig::default(), "/tmp/sage".as_ref()).await?;
//!     memory.start();
//!
//!     memory.record_turn("I'm allergic to peanuts")?;
//!     let bundle = memory.assemble("what should I cook tonight?", 256).await?;
//!     println!("{}", bundle.render());
//!
//!     memory.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod persistence;
pub mod salience;
pub mod scheduler;
pub mod store;
pub mod system;
pub mod types;
pub mod utils;

pub use config::{ConfigValidationError, MemoryConfig, SageConfig, SchedulerConfig, StorageBackend, StorageConfig};
pub use context::{ApproxTokenCounter, BundleEntry, ContextAssembler, ContextBundle, TokenCounter};
pub use embedding::{Embedder, EmbeddingIndex, HashingEmbedder};
#[cfg(feature = "embeddings")]
pub use embedding::FastEmbedder;
pub use error::{MemoryError, MemoryResult};
pub use persistence::{JsonSnapshotStore, SnapshotStore, SqliteSnapshotStore, open_store};
pub use salience::{FixedSalience, HeuristicSalience, SalienceStrategy};
pub use scheduler::{DurabilityWarning, JobKind, JobPayload, JobQueue, ShutdownReport, TaskScheduler};
pub use store::MemoryStore;
pub use system::{MemoryJobRunner, SageMemory};
pub use types::{
    DecayReport, EntryId, MemoryEntry, MemoryStats, PromoteOutcome, RankedEntry, RetrievalSource,
    Role, SearchFilter, Snapshot, Tier,
};

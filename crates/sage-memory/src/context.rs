//! Context Assembler
//!
//! Builds the token-budgeted bundle of memories handed to the language
//! model before it replies. Candidates come from
//! [`MemoryStore::candidates`] in priority order and are packed greedily
//! until the next one would overflow the budget.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::MemoryResult;
use crate::store::MemoryStore;
use crate::types::{EntryId, MemoryEntry, RankedEntry, RetrievalSource};

/// Token estimation
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Roughly four characters per token; at least one token for non-empty text
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproxTokenCounter;

impl TokenCounter for ApproxTokenCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        if chars == 0 { 0 } else { chars.div_ceil(4).max(1) }
    }
}

/// One packed memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// Copy of the stored entry
    pub entry: MemoryEntry,
    pub score: f64,
    pub source: RetrievalSource,
    /// Tokens charged against the budget for this entry
    pub tokens: usize,
}

/// Memories selected for one reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Highest priority first
    pub entries: Vec<BundleEntry>,
    pub token_count: usize,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.entries.iter().map(|e| e.entry.id).collect()
    }

    /// "Role: text" lines in priority order
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.entry.render_line())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pack ranked candidates into `budget` tokens.
///
/// Stops at the first candidate that does not fit, so lower-priority
/// entries never displace a higher-priority one.
pub fn pack(candidates: Vec<RankedEntry>, budget: usize, counter: &dyn TokenCounter) -> ContextBundle {
    let mut bundle = ContextBundle::default();
    for candidate in candidates {
        let tokens = counter.count(&candidate.entry.render_line());
        if bundle.token_count + tokens > budget {
            break;
        }
        bundle.token_count += tokens;
        bundle.entries.push(BundleEntry {
            entry: candidate.entry,
            score: candidate.score,
            source: candidate.source,
            tokens,
        });
    }
    bundle
}

/// Token-budgeted retrieval over a [`MemoryStore`]
pub struct ContextAssembler {
    store: Arc<MemoryStore>,
    counter: Arc<dyn TokenCounter>,
}

impl ContextAssembler {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self::with_counter(store, Arc::new(ApproxTokenCounter))
    }

    pub fn with_counter(store: Arc<MemoryStore>, counter: Arc<dyn TokenCounter>) -> Self {
        Self { store, counter }
    }

    /// Select memories for `query` within `token_budget` tokens.
    ///
    /// A budget of zero or an empty store yields an empty bundle. Access
    /// bookkeeping for packed entries is queued, not applied, so repeated
    /// calls against an unchanged store return the same bundle.
    pub async fn assemble(&self, query: &str, token_budget: usize) -> MemoryResult<ContextBundle> {
        if token_budget == 0 {
            return Ok(ContextBundle::default());
        }

        let pool = self.store.config().candidate_pool;
        let candidates = self.store.candidates(query, pool).await?;
        let considered = candidates.len();
        let bundle = pack(candidates, token_budget, self.counter.as_ref());

        self.store.record_access(&bundle.ids());
        tracing::debug!(
            considered,
            packed = bundle.len(),
            tokens = bundle.token_count,
            budget = token_budget,
            "assembled context"
        );
        Ok(bundle)
    }
}

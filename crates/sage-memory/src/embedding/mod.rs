//! Embedding Index for Semantic Retrieval
//!
//! Turns text into fixed-length vectors through a pluggable [`Embedder`]
//! and answers nearest-neighbour queries over the indexed entries.
//!
//! # Embedders
//!
//! - [`HashingEmbedder`] - deterministic feature hashing, no model download
//! - `FastEmbedder` - local all-MiniLM-L6-v2 (requires the `embeddings` feature)
//!
//! # Usage
//!
//! ```ignore
//! use sage_memory::embedding::{EmbeddingIndex, HashingEmbedder};
//!
//! let index = EmbeddingIndex::new(Arc::new(HashingEmbedder::default()));
//! index.index(id, "I love hiking", Utc::now()).await?;
//! let hits = index.search("hiking trips", 5).await?;
//! ```

mod hashing;
#[cfg(feature = "embeddings")]
mod minilm;

pub use hashing::HashingEmbedder;
#[cfg(feature = "embeddings")]
pub use minilm::FastEmbedder;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{EntryId, IndexRecord};
use crate::utils::{read_lock, write_lock};
use crate::{MemoryError, MemoryResult};

/// Text to vector conversion
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Empty or whitespace-only text is an `IndexingFailure`.
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>>;

    /// Length of every vector this embedder produces
    fn dimensions(&self) -> usize;

    /// Short identifier used in logs
    fn name(&self) -> &str;
}

/// Compute cosine similarity between two vectors
///
/// Returns a value between -1.0 and 1.0. Mismatched lengths and zero
/// vectors yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Normalize a similarity score to 0-1 range
pub fn normalize_similarity(similarity: f32) -> f32 {
    (similarity + 1.0) / 2.0
}

struct IndexSlot {
    vector: Arc<[f32]>,
    last_accessed: DateTime<Utc>,
}

/// Nearest-neighbour index over entry embeddings
///
/// Vectors are swapped whole under the write lock, so a concurrent reader
/// sees either the previous or the new vector for an id.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    slots: RwLock<HashMap<EntryId, IndexSlot>>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Embed text without touching the index
    pub async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::indexing("cannot embed empty text"));
        }
        let vector = self.embedder.embed(text).await?;
        self.check_dimensions(&vector)?;
        Ok(vector)
    }

    /// Embed `text` and index it under `id`
    pub async fn index(
        &self,
        id: EntryId,
        text: &str,
        last_accessed: DateTime<Utc>,
    ) -> MemoryResult<Vec<f32>> {
        let vector = self.embed(text).await?;
        self.insert(id, &vector, last_accessed)?;
        Ok(vector)
    }

    /// Index a precomputed vector, replacing any previous one
    pub fn insert(&self, id: EntryId, vector: &[f32], last_accessed: DateTime<Utc>) -> MemoryResult<()> {
        self.check_dimensions(vector)?;
        write_lock(&self.slots).insert(
            id,
            IndexSlot {
                vector: Arc::from(vector),
                last_accessed,
            },
        );
        Ok(())
    }

    /// Embed `query` and return the `k` most similar entries
    pub async fn search(&self, query: &str, k: usize) -> MemoryResult<Vec<(EntryId, f32)>> {
        let vector = self.embed(query).await?;
        Ok(self.search_vector(&vector, k))
    }

    /// The `k` most similar entries to `query`, best first
    pub fn search_vector(&self, query: &[f32], k: usize) -> Vec<(EntryId, f32)> {
        self.search_vector_where(query, k, |_| true)
    }

    /// Like [`search_vector`](Self::search_vector), restricted to ids accepted by `filter`.
    ///
    /// Ties on similarity go to the more recently accessed entry, then to
    /// the smaller id.
    pub fn search_vector_where<F>(&self, query: &[f32], k: usize, filter: F) -> Vec<(EntryId, f32)>
    where
        F: Fn(&EntryId) -> bool,
    {
        if k == 0 {
            return Vec::new();
        }

        let slots = read_lock(&self.slots);
        let mut scored: Vec<(EntryId, f32, DateTime<Utc>)> = slots
            .iter()
            .filter(|(id, _)| filter(id))
            .map(|(id, slot)| (*id, cosine_similarity(query, &slot.vector), slot.last_accessed))
            .collect();
        drop(slots);

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored.into_iter().map(|(id, sim, _)| (id, sim)).collect()
    }

    pub fn remove(&self, id: &EntryId) -> bool {
        write_lock(&self.slots).remove(id).is_some()
    }

    pub fn contains(&self, id: &EntryId) -> bool {
        read_lock(&self.slots).contains_key(id)
    }

    pub fn len(&self) -> usize {
        read_lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an access for tie-breaking
    pub fn touch(&self, id: &EntryId, at: DateTime<Utc>) {
        if let Some(slot) = write_lock(&self.slots).get_mut(id) {
            slot.last_accessed = at;
        }
    }

    /// Stored vector for `id`
    pub fn vector(&self, id: &EntryId) -> Option<Arc<[f32]>> {
        read_lock(&self.slots).get(id).map(|slot| Arc::clone(&slot.vector))
    }

    /// Every indexed vector, ordered by id
    pub fn records(&self) -> Vec<IndexRecord> {
        let slots = read_lock(&self.slots);
        let mut records: Vec<IndexRecord> = slots
            .iter()
            .map(|(id, slot)| IndexRecord {
                id: *id,
                vector: slot.vector.to_vec(),
            })
            .collect();
        drop(slots);
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn clear(&self) {
        write_lock(&self.slots).clear();
    }

    fn check_dimensions(&self, vector: &[f32]) -> MemoryResult<()> {
        let expected = self.embedder.dimensions();
        if vector.len() != expected {
            return Err(MemoryError::indexing(format!(
                "{} produced {} dimensions, expected {}",
                self.embedder.name(),
                vector.len(),
                expected
            )));
        }
        Ok(())
    }
}

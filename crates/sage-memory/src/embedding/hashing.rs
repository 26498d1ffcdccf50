//! Feature-hashing embedder
//!
//! Lowercased word unigrams and bigrams are hashed into a fixed number of
//! signed buckets and the result is L2-normalised. Deterministic across
//! runs and platforms, with no model to download.

use async_trait::async_trait;

use super::Embedder;
use crate::utils::feature_hash;
use crate::{MemoryError, MemoryResult};

/// Default vector length
pub const DEFAULT_DIMENSIONS: usize = 256;

const UNIGRAM_WEIGHT: f32 = 1.0;
const BIGRAM_WEIGHT: f32 = 0.5;

/// Deterministic bag-of-words embedder
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn tokens(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Synchronous embedding used by the async trait method
    pub fn embed_sync(&self, text: &str) -> MemoryResult<Vec<f32>> {
        let tokens = Self::tokens(text);
        if tokens.is_empty() {
            return Err(MemoryError::indexing("text has no embeddable tokens"));
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for token in &tokens {
            let (bucket, sign) = feature_hash(token, self.dimensions);
            vector[bucket] += sign * UNIGRAM_WEIGHT;
        }
        for pair in tokens.windows(2) {
            let (bucket, sign) = feature_hash(&format!("{} {}", pair[0], pair[1]), self.dimensions);
            vector[bucket] += sign * BIGRAM_WEIGHT;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            // Every feature cancelled out; fall back to the first token's bucket.
            let (bucket, _) = feature_hash(&tokens[0], self.dimensions);
            vector[bucket] = 1.0;
            return Ok(vector);
        }
        for x in &mut vector {
            *x /= norm;
        }
        Ok(vector)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        self.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic_and_normalised() {
        let e = HashingEmbedder::default();
        let a = e.embed_sync("I love hiking").unwrap();
        let b = e.embed_sync("i LOVE hiking!").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DEFAULT_DIMENSIONS);

        let norm = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_text_scores_higher() {
        let e = HashingEmbedder::default();
        let query = e.embed_sync("what do I like to eat for breakfast").unwrap();
        let related = e.embed_sync("I like to eat pancakes for breakfast").unwrap();
        let unrelated = e.embed_sync("the train leaves at noon").unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_punctuation_only_fails() {
        let e = HashingEmbedder::default();
        assert!(e.embed_sync("?!...").unwrap_err().is_indexing_failure());
    }
}

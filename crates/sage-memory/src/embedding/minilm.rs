//! Local sentence embeddings via `fastembed`
//!
//! Uses the all-MiniLM-L6-v2 model (384 dimensions). The model is loaded
//! on first use. Inference is synchronous, so it runs on the blocking pool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::Embedder;
use crate::{MemoryError, MemoryResult};

/// Embedding dimensions for all-MiniLM-L6-v2
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Lazily loaded all-MiniLM-L6-v2 embedder
pub struct FastEmbedder {
    model: Arc<RwLock<Option<Arc<fastembed::TextEmbedding>>>>,
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl FastEmbedder {
    pub fn new() -> Self {
        Self {
            model: Arc::new(RwLock::new(None)),
        }
    }

    /// Loaded model, initializing it on first use
    async fn ensure_model(&self) -> MemoryResult<Arc<fastembed::TextEmbedding>> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        if let Some(model) = self.model.read().await.as_ref() {
            return Ok(model.clone());
        }

        let mut model_guard = self.model.write().await;
        if let Some(model) = model_guard.as_ref() {
            return Ok(model.clone());
        }

        tracing::info!("Loading embedding model: all-MiniLM-L6-v2");
        let start = std::time::Instant::now();

        let mut init_options = InitOptions::default();
        init_options.model_name = EmbeddingModel::AllMiniLML6V2;
        init_options.show_download_progress = false;

        let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(init_options))
            .await
            .map_err(|e| MemoryError::indexing(format!("embedding model loader failed: {}", e)))?
            .map_err(|e| MemoryError::indexing(format!("failed to load embedding model: {}", e)))?;
        let model = Arc::new(model);

        tracing::info!("Embedding model loaded in {:?}", start.elapsed());

        *model_guard = Some(model.clone());
        Ok(model)
    }

    /// Check if the model is loaded
    pub async fn is_loaded(&self) -> bool {
        self.model.read().await.is_some()
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> MemoryResult<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(MemoryError::indexing("cannot embed empty text"));
        }

        let model = self.ensure_model().await?;
        let text = text.to_string();

        let embeddings = tokio::task::spawn_blocking(move || model.embed(vec![text], None))
            .await
            .map_err(|e| MemoryError::indexing(format!("embedding task failed: {}", e)))?
            .map_err(|e| MemoryError::indexing(format!("failed to generate embedding: {}", e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| MemoryError::indexing("no embedding generated"))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn name(&self) -> &str {
        "all-MiniLM-L6-v2"
    }
}

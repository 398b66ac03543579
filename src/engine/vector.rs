use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{RESULT_LIMIT, SearchEngine, empty_query_slice};
use crate::embedding::{Embedder, cosine_similarity};
use crate::error::BridgeError;
use crate::registry::ToolMetadata;

/// Scores at or below this threshold are noise and dropped.
const MIN_SCORE: f32 = 0.01;

/// One text view per tool, fed to the embedder.
pub fn compose_text(meta: &ToolMetadata) -> String {
    format!(
        "{} {} {} {} {} {}",
        meta.id,
        meta.name,
        meta.description,
        meta.method,
        meta.path,
        meta.tags.join(" ")
    )
}

#[derive(Default)]
struct VectorState {
    catalog: Vec<ToolMetadata>,
    /// Aligned with `catalog`.
    vectors: Vec<Vec<f32>>,
}

/// Cosine-similarity ranking over dense vectors produced by an embedder.
pub struct VectorEngine {
    embedder: Arc<dyn Embedder>,
    state: RwLock<VectorState>,
    top_k: usize,
}

impl VectorEngine {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self::with_top_k(embedder, RESULT_LIMIT)
    }

    pub fn with_top_k(embedder: Arc<dyn Embedder>, top_k: usize) -> Self {
        Self {
            embedder,
            state: RwLock::new(VectorState::default()),
            top_k,
        }
    }
}

#[async_trait]
impl SearchEngine for VectorEngine {
    fn name(&self) -> &'static str {
        "vector"
    }

    async fn index(&self, tools: &[ToolMetadata]) -> Result<(), BridgeError> {
        let texts: Vec<String> = tools.iter().map(compose_text).collect();
        // Embed before taking the lock; a concurrent search keeps seeing
        // the previous state until the swap below.
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| BridgeError::Index(format!("embedding batch failed: {e}")))?;

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.catalog = tools.to_vec();
        state.vectors = vectors;
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolMetadata>, BridgeError> {
        if query.trim().is_empty() {
            let state = self.state.read().unwrap_or_else(|e| e.into_inner());
            return Ok(empty_query_slice(&state.catalog));
        }

        let query_vector = self.embedder.embed_single(query).await?;

        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut scored: Vec<(usize, f32)> = state
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(&query_vector, v)))
            .filter(|(_, score)| *score > MIN_SCORE)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(self.top_k);

        Ok(scored
            .into_iter()
            .map(|(i, _)| state.catalog[i].clone())
            .collect())
    }

    fn close(&self) {
        self.embedder.close();
    }
}

pub mod adaptive;
pub mod local;
pub mod remote;
pub mod tfidf;

pub use adaptive::{AdaptiveEmbedder, EmbedderType};
pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;
pub use tfidf::TfIdfEmbedder;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BridgeError;

/// Runtime-adjustable embedder settings.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of the remote embedding service (OpenAI-style API).
    pub endpoint: Option<String>,
    /// Model name sent to the remote service.
    pub model: String,
    /// Target vector dimension. TF-IDF caps its vocabulary at this size;
    /// the remote embedder overrides it on the first successful call.
    pub dimension: usize,
    /// Local model file or hub id.
    pub model_path: Option<String>,
    /// Cache directory for downloaded models. Defaults to the user cache dir.
    pub cache_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "text-embedding-3-small".to_string(),
            dimension: 256,
            model_path: None,
            cache_dir: None,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Maps text batches to dense vectors of a fixed dimension.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BridgeError>;

    async fn embed_single(&self, text: &str) -> Result<Vec<f32>, BridgeError> {
        let batch = vec![text.to_string()];
        let mut vectors = self.embed(&batch).await?;
        vectors
            .pop()
            .ok_or_else(|| BridgeError::Embedding("embedder returned an empty batch".into()))
    }

    fn dimension(&self) -> usize;

    fn close(&self) {}
}

/// Embedders whose settings can change at runtime.
pub trait Configurable {
    fn reconfigure(&self, config: EmbeddingConfig);
    fn config(&self) -> EmbeddingConfig;
}

/// Numerically stable cosine similarity: `dot / (||a|| * ||b||)`.
///
/// Returns 0 for zero vectors and for length-mismatched inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// L2-normalize a vector in-place. Zero vectors are left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vec.iter_mut() {
            *x /= norm;
        }
    }
}

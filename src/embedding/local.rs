use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "local-model")]
use model2vec_rs::model::StaticModel;
#[cfg(feature = "local-model")]
use std::sync::Arc;
#[cfg(feature = "local-model")]
use tracing::{info, warn};

use super::{Configurable, Embedder, EmbeddingConfig, l2_normalize};
use crate::error::BridgeError;

/// Semantic clusters backing the offline word-vector fallback. Words sharing
/// a cluster share a dominant axis, so related verbs and nouns land close.
const SEMANTIC_CLUSTERS: &[&[&str]] = &[
    &["search", "find", "query", "lookup", "filter", "match"],
    &["create", "add", "new", "insert", "register", "submit"],
    &["update", "edit", "modify", "change", "patch", "replace"],
    &["delete", "remove", "destroy", "drop", "clear", "purge"],
    &["list", "all", "index", "enumerate", "browse", "page"],
    &["get", "fetch", "read", "retrieve", "show", "view"],
    &["user", "account", "profile", "member", "person", "customer"],
    &["order", "cart", "checkout", "payment", "invoice", "billing"],
    &["file", "document", "upload", "download", "attachment", "storage"],
    &["message", "notification", "email", "chat", "comment", "reply"],
    &["auth", "login", "logout", "token", "session", "password"],
    &["config", "setting", "option", "preference", "parameter", "flag"],
    &["status", "health", "metric", "monitor", "log", "report"],
    &["tag", "label", "category", "group", "type", "kind"],
    &["time", "date", "schedule", "calendar", "event", "history"],
    &["pet", "animal", "store", "product", "item", "inventory"],
];

fn fnv1a(s: &str) -> usize {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.as_bytes() {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash as usize
}

fn cluster_of(word: &str) -> Option<usize> {
    SEMANTIC_CLUSTERS
        .iter()
        .position(|cluster| cluster.contains(&word))
}

/// Self-contained word vectors used when no model file is present.
struct FallbackVectors {
    dimension: usize,
}

impl FallbackVectors {
    fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(SEMANTIC_CLUSTERS.len()),
        }
    }

    fn word_vector(&self, word: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        if let Some(cluster) = cluster_of(word) {
            v[cluster % self.dimension] += 2.0;
        }
        let h = fnv1a(word);
        v[h % self.dimension] += 1.0;
        v[(h >> 16) % self.dimension] += 0.5;
        v
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut acc = vec![0.0f32; self.dimension];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            for (slot, value) in acc.iter_mut().zip(self.word_vector(token)) {
                *slot += value;
            }
        }
        l2_normalize(&mut acc);
        acc
    }
}

#[derive(Default)]
struct LocalState {
    #[cfg(feature = "local-model")]
    model: Option<Arc<StaticModel>>,
    fallback: Option<FallbackVectors>,
    attempted: bool,
}

impl LocalState {
    fn has_model(&self) -> bool {
        #[cfg(feature = "local-model")]
        {
            self.model.is_some()
        }
        #[cfg(not(feature = "local-model"))]
        {
            false
        }
    }
}

/// Embedder over a local static embedding model, with a deterministic
/// offline fallback.
///
/// Opening the model (or downloading it into the user cache directory on
/// first use) is attempted once; any failure switches to the built-in
/// word-vector scheme permanently until reconfiguration.
pub struct LocalEmbedder {
    config: RwLock<EmbeddingConfig>,
    state: RwLock<LocalState>,
    detected_dimension: AtomicUsize,
}

impl LocalEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config: RwLock::new(config),
            state: RwLock::new(LocalState::default()),
            detected_dimension: AtomicUsize::new(0),
        }
    }

    fn ensure_backing(&self) {
        if self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .attempted
        {
            return;
        }

        let config = self.config.read().unwrap_or_else(|e| e.into_inner()).clone();
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.attempted {
            return;
        }

        #[cfg(feature = "local-model")]
        if let Some(model_path) = &config.model_path {
            match StaticModel::from_pretrained(model_path, None, Some(true), None) {
                Ok(model) => {
                    info!(model = %model_path, "local embedding model loaded");
                    state.model = Some(Arc::new(model));
                }
                Err(e) => {
                    warn!(model = %model_path, error = %e, "failed to load local embedding model, using word-vector fallback");
                }
            }
        }

        if !state.has_model() {
            state.fallback = Some(FallbackVectors::new(config.dimension));
        }
        state.attempted = true;
    }

    /// Whether a backing is usable: the model loaded, or the fallback
    /// vectors are initialized.
    pub fn is_available(&self) -> bool {
        self.ensure_backing();
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.has_model() || state.fallback.is_some()
    }
}

#[async_trait::async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BridgeError> {
        self.ensure_backing();
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());

        #[cfg(feature = "local-model")]
        if let Some(model) = &state.model {
            let mut vectors = model.encode(texts);
            for v in &mut vectors {
                l2_normalize(v);
            }
            if let Some(first) = vectors.first()
                && self.detected_dimension.load(Ordering::Acquire) == 0
            {
                self.detected_dimension.store(first.len(), Ordering::Release);
            }
            return Ok(vectors);
        }

        let fallback = state
            .fallback
            .as_ref()
            .ok_or_else(|| BridgeError::Embedding("local embedder has no backing".into()))?;
        self.detected_dimension
            .store(fallback.dimension, Ordering::Release);
        Ok(texts.iter().map(|t| fallback.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        let detected = self.detected_dimension.load(Ordering::Acquire);
        if detected > 0 {
            detected
        } else {
            self.config
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .dimension
        }
    }

    fn close(&self) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = LocalState::default();
    }
}

impl Configurable for LocalEmbedder {
    fn reconfigure(&self, config: EmbeddingConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = LocalState::default();
        self.detected_dimension.store(0, Ordering::Release);
    }

    fn config(&self) -> EmbeddingConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

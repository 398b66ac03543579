use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{Configurable, Embedder, EmbeddingConfig, l2_normalize};
use crate::error::BridgeError;
use crate::tokenize::Tokenizer;

#[derive(Default)]
struct TfIdfState {
    /// Token -> vector index, in first-seen order, capped at the configured
    /// dimension.
    vocab: HashMap<String, usize>,
    idf: Vec<f32>,
}

/// Local, deterministic embedder over a TF-IDF vocabulary.
///
/// The vocabulary is built lazily from the first embedded batch, or eagerly
/// via [`TfIdfEmbedder::index_documents`]. Seeding from the full corpus is
/// what makes query vectors land in the same space as document vectors.
pub struct TfIdfEmbedder {
    tokenizer: Arc<dyn Tokenizer>,
    config: RwLock<EmbeddingConfig>,
    state: RwLock<TfIdfState>,
}

impl TfIdfEmbedder {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: EmbeddingConfig) -> Self {
        Self {
            tokenizer,
            config: RwLock::new(config),
            state: RwLock::new(TfIdfState::default()),
        }
    }

    /// Pre-seed the vocabulary and IDF weights from a document corpus.
    pub fn index_documents(&self, docs: &[String]) {
        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| self.tokenizer.tokenize(d)).collect();
        let cap = self.config.read().unwrap_or_else(|e| e.into_inner()).dimension;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = build_state(&tokenized, cap);
    }

    fn ensure_vocab(&self, texts: &[String]) {
        if !self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .vocab
            .is_empty()
        {
            return;
        }
        self.index_documents(texts);
    }

    fn vectorize(&self, state: &TfIdfState, tokens: &[String]) -> Vec<f32> {
        let mut vector = vec![0.0f32; state.vocab.len()];
        for token in tokens {
            if let Some(&idx) = state.vocab.get(token) {
                vector[idx] += state.idf[idx];
            }
        }
        l2_normalize(&mut vector);
        vector
    }
}

fn build_state(docs: &[Vec<String>], cap: usize) -> TfIdfState {
    let mut vocab: HashMap<String, usize> = HashMap::new();
    let mut df: Vec<usize> = Vec::new();

    for tokens in docs {
        let mut seen: Vec<usize> = Vec::new();
        for token in tokens {
            let idx = match vocab.get(token).copied() {
                Some(idx) => idx,
                None => {
                    if vocab.len() >= cap {
                        continue;
                    }
                    let next = vocab.len();
                    vocab.insert(token.clone(), next);
                    df.push(0);
                    next
                }
            };
            if !seen.contains(&idx) {
                seen.push(idx);
                df[idx] += 1;
            }
        }
    }

    let n = docs.len().max(1) as f32;
    let idf = df
        .iter()
        .map(|&count| (n / (1.0 + count as f32)).ln() + 1.0)
        .collect();

    TfIdfState { vocab, idf }
}

#[async_trait]
impl Embedder for TfIdfEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BridgeError> {
        self.ensure_vocab(texts);
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(texts
            .iter()
            .map(|text| self.vectorize(&state, &self.tokenizer.tokenize(text)))
            .collect())
    }

    fn dimension(&self) -> usize {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        if state.vocab.is_empty() {
            self.config
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .dimension
        } else {
            state.vocab.len()
        }
    }
}

impl Configurable for TfIdfEmbedder {
    /// Reconfiguring clears the vocabulary; the next embed rebuilds it.
    fn reconfigure(&self, config: EmbeddingConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = TfIdfState::default();
    }

    fn config(&self) -> EmbeddingConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

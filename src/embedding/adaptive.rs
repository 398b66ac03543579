use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::info;

use super::{Configurable, Embedder, EmbeddingConfig, LocalEmbedder, RemoteEmbedder, TfIdfEmbedder};
use crate::error::BridgeError;

/// Concrete embedder chosen for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderType {
    Remote,
    Local,
    TfIdf,
}

impl fmt::Display for EmbedderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbedderType::Remote => write!(f, "remote"),
            EmbedderType::Local => write!(f, "local"),
            EmbedderType::TfIdf => write!(f, "tfidf"),
        }
    }
}

/// Composite embedder that picks a concrete backing per call.
///
/// Preference order: remote service when its probe is fresh and positive,
/// then the local model, then TF-IDF (always available).
pub struct AdaptiveEmbedder {
    remote: Option<Arc<RemoteEmbedder>>,
    local: Arc<LocalEmbedder>,
    tfidf: Arc<TfIdfEmbedder>,
    active: RwLock<EmbedderType>,
}

impl AdaptiveEmbedder {
    pub fn new(
        remote: Option<Arc<RemoteEmbedder>>,
        local: Arc<LocalEmbedder>,
        tfidf: Arc<TfIdfEmbedder>,
    ) -> Self {
        Self {
            remote,
            local,
            tfidf,
            active: RwLock::new(EmbedderType::TfIdf),
        }
    }

    /// The backing chosen by the most recent embed call.
    pub fn active_type(&self) -> EmbedderType {
        *self.active.read().unwrap_or_else(|e| e.into_inner())
    }

    /// TF-IDF backing, exposed for corpus pre-seeding.
    pub fn tfidf(&self) -> &Arc<TfIdfEmbedder> {
        &self.tfidf
    }

    async fn select(&self) -> (Arc<dyn Embedder>, EmbedderType) {
        if let Some(remote) = &self.remote
            && remote.is_available().await
        {
            self.note_selection(EmbedderType::Remote);
            return (Arc::clone(remote) as Arc<dyn Embedder>, EmbedderType::Remote);
        }
        if self.local.is_available() {
            self.note_selection(EmbedderType::Local);
            return (
                Arc::clone(&self.local) as Arc<dyn Embedder>,
                EmbedderType::Local,
            );
        }
        self.note_selection(EmbedderType::TfIdf);
        (
            Arc::clone(&self.tfidf) as Arc<dyn Embedder>,
            EmbedderType::TfIdf,
        )
    }

    fn note_selection(&self, selected: EmbedderType) {
        // Writer lock only when the selection actually changes.
        let current = *self.active.read().unwrap_or_else(|e| e.into_inner());
        if current != selected {
            info!(from = %current, to = %selected, "embedder selection changed");
            *self.active.write().unwrap_or_else(|e| e.into_inner()) = selected;
        }
    }
}

#[async_trait]
impl Embedder for AdaptiveEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BridgeError> {
        let (embedder, _) = self.select().await;
        embedder.embed(texts).await
    }

    fn dimension(&self) -> usize {
        match self.active_type() {
            EmbedderType::Remote => self
                .remote
                .as_ref()
                .map(|r| r.dimension())
                .unwrap_or_else(|| self.tfidf.dimension()),
            EmbedderType::Local => self.local.dimension(),
            EmbedderType::TfIdf => self.tfidf.dimension(),
        }
    }

    fn close(&self) {
        if let Some(remote) = &self.remote {
            remote.close();
        }
        self.local.close();
        self.tfidf.close();
    }
}

impl Configurable for AdaptiveEmbedder {
    /// Propagates to every backing; each one re-initializes lazily.
    fn reconfigure(&self, config: EmbeddingConfig) {
        if let Some(remote) = &self.remote {
            remote.reconfigure(config.clone());
        }
        self.local.reconfigure(config.clone());
        self.tfidf.reconfigure(config);
    }

    fn config(&self) -> EmbeddingConfig {
        match self.active_type() {
            EmbedderType::Remote => self
                .remote
                .as_ref()
                .map(|r| r.config())
                .unwrap_or_else(|| self.tfidf.config()),
            EmbedderType::Local => self.local.config(),
            EmbedderType::TfIdf => self.tfidf.config(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingConfig;
    use crate::tokenize::SimpleTokenizer;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parts() -> (Arc<LocalEmbedder>, Arc<TfIdfEmbedder>) {
        (
            Arc::new(LocalEmbedder::new(EmbeddingConfig::default())),
            Arc::new(TfIdfEmbedder::new(
                Arc::new(SimpleTokenizer::default()),
                EmbeddingConfig::default(),
            )),
        )
    }

    #[tokio::test]
    async fn test_falls_back_to_local_without_remote() {
        let (local, tfidf) = parts();
        let adaptive = AdaptiveEmbedder::new(None, local, tfidf);

        adaptive.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(adaptive.active_type(), EmbedderType::Local);
    }

    #[tokio::test]
    async fn test_prefers_available_remote() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [1.0, 0.0]}]
            })))
            .mount(&server)
            .await;

        let remote = Arc::new(RemoteEmbedder::new(
            reqwest::Client::new(),
            EmbeddingConfig {
                endpoint: Some(server.uri()),
                ..Default::default()
            },
        ));
        let (local, tfidf) = parts();
        let adaptive = AdaptiveEmbedder::new(Some(remote), local, tfidf);

        adaptive.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(adaptive.active_type(), EmbedderType::Remote);
    }

    #[tokio::test]
    async fn test_unreachable_remote_is_skipped() {
        let remote = Arc::new(RemoteEmbedder::new(
            reqwest::Client::new(),
            EmbeddingConfig {
                // Nothing listens here; the probe fails fast.
                endpoint: Some("http://127.0.0.1:1".to_string()),
                timeout: std::time::Duration::from_millis(200),
                ..Default::default()
            },
        ));
        let (local, tfidf) = parts();
        let adaptive = AdaptiveEmbedder::new(Some(remote), local, tfidf);

        adaptive.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(adaptive.active_type(), EmbedderType::Local);
    }
}

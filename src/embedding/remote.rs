use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Configurable, Embedder, EmbeddingConfig};
use crate::error::BridgeError;

/// How long a probe result stays fresh.
const PROBE_TTL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy)]
struct ProbeResult {
    at: Instant,
    available: bool,
}

/// Embedder backed by an external OpenAI-style embedding service.
///
/// Requests are issued one text at a time. The vector dimension is fixed by
/// the first successful response.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    config: RwLock<EmbeddingConfig>,
    /// 0 until the first successful call fixes it.
    detected_dimension: AtomicUsize,
    /// Serializes availability probes and caches the result.
    probe: tokio::sync::Mutex<Option<ProbeResult>>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl RemoteEmbedder {
    pub fn new(client: reqwest::Client, config: EmbeddingConfig) -> Self {
        Self {
            client,
            config: RwLock::new(config),
            detected_dimension: AtomicUsize::new(0),
            probe: tokio::sync::Mutex::new(None),
        }
    }

    fn endpoint(&self) -> Option<(String, String, Duration)> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        config.endpoint.as_ref().map(|e| {
            (
                e.trim_end_matches('/').to_string(),
                config.model.clone(),
                config.timeout,
            )
        })
    }

    /// Whether the service answers its status endpoint. Any 2xx counts.
    /// Results are cached for 30 seconds under a dedicated mutex so
    /// concurrent callers do not stampede the endpoint.
    pub async fn is_available(&self) -> bool {
        let Some((endpoint, _, timeout)) = self.endpoint() else {
            return false;
        };

        let mut probe = self.probe.lock().await;
        if let Some(cached) = *probe
            && cached.at.elapsed() < PROBE_TTL
        {
            return cached.available;
        }

        let available = match self
            .client
            .get(format!("{endpoint}/models"))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "embedding service probe failed");
                false
            }
        };

        *probe = Some(ProbeResult {
            at: Instant::now(),
            available,
        });
        available
    }

    async fn embed_one(
        &self,
        endpoint: &str,
        model: &str,
        timeout: Duration,
        text: &str,
    ) -> Result<Vec<f32>, BridgeError> {
        let response = self
            .client
            .post(format!("{endpoint}/embeddings"))
            .timeout(timeout)
            .json(&serde_json::json!({ "model": model, "input": text }))
            .send()
            .await
            .map_err(|e| BridgeError::Embedding(format!("embedding request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(BridgeError::Embedding(format!(
                "embedding service returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Embedding(format!("invalid embedding response: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| BridgeError::Embedding("embedding response carried no data".into()))
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BridgeError> {
        let (endpoint, model, timeout) = self
            .endpoint()
            .ok_or_else(|| BridgeError::Embedding("no embedding endpoint configured".into()))?;

        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            let vector = self.embed_one(&endpoint, &model, timeout, text).await?;
            // First success fixes the dimension until reconfiguration.
            if self.detected_dimension.load(Ordering::Acquire) == 0 && !vector.is_empty() {
                self.detected_dimension
                    .store(vector.len(), Ordering::Release);
            }
            vectors.push(vector);
        }
        Ok(vectors)
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
}

impl Configurable for RemoteEmbedder {
    fn reconfigure(&self, config: EmbeddingConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        self.detected_dimension.store(0, Ordering::Release);
        if let Ok(mut probe) = self.probe.try_lock() {
            *probe = None;
        } else {
            warn!("embedding probe in flight during reconfigure; cache expires on its own");
        }
    }

    fn config(&self) -> EmbeddingConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint: Some(endpoint.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_embed_and_dimension_detection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let e = RemoteEmbedder::new(reqwest::Client::new(), config(&server.uri()));
        let vectors = e.embed(&["hello".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 3);
        assert_eq!(e.dimension(), 3);
    }

    #[tokio::test]
    async fn test_availability_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let e = RemoteEmbedder::new(reqwest::Client::new(), config(&server.uri()));
        assert!(e.is_available().await);
    }

    #[tokio::test]
    async fn test_probe_result_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let e = RemoteEmbedder::new(reqwest::Client::new(), config(&server.uri()));
        assert!(e.is_available().await);
        // Second call served from the 30s cache; the mock expects one hit.
        assert!(e.is_available().await);
    }

    #[tokio::test]
    async fn test_unavailable_without_endpoint() {
        let e = RemoteEmbedder::new(reqwest::Client::new(), EmbeddingConfig::default());
        assert!(!e.is_available().await);
        assert!(e.embed(&["x".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let e = RemoteEmbedder::new(reqwest::Client::new(), config(&server.uri()));
        let err = e.embed(&["hello".to_string()]).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}

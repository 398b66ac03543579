use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tracing::warn;

use super::lexical::LexicalEngine;
use super::predicate::{PredicateEngine, PredicateExpr};
use super::vector::VectorEngine;
use super::{SearchEngine, empty_query_slice};
use crate::config::{FusionKind, HybridSettings};
use crate::embedding::Embedder;
use crate::error::BridgeError;
use crate::registry::ToolMetadata;
use crate::tokenize::{SimpleTokenizer, Tokenizer, TokenizerConfig};

/// Fusion parameters, swappable at runtime without a re-index.
pub struct FusionSettings {
    strategy: FusionKind,
    rrf_k: f64,
    vector_weight: f64,
    top_k: usize,
    predicate_filter: Option<PredicateExpr>,
}

impl FusionSettings {
    fn from_settings(settings: &HybridSettings) -> Result<Self, BridgeError> {
        let predicate_filter = settings
            .predicate_filter
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(PredicateExpr::parse)
            .transpose()?;
        Ok(Self {
            strategy: settings.fusion,
            rrf_k: f64::from(settings.rrf_k),
            vector_weight: f64::from(settings.vector_weight).clamp(0.0, 1.0),
            top_k: settings.top_k,
            predicate_filter,
        })
    }
}

/// Combines lexical and semantic rankings, with optional predicate
/// post-filtering.
///
/// Indexing fans out to the three sub-engines. The lexical one receives
/// name/description/path pre-tokenized with the configured tokenizer and
/// indexes the joined form with plain whitespace splitting, so CJK catalogs
/// match correctly. Ids stay verbatim; they carry ranking identity.
pub struct HybridEngine {
    lexical: LexicalEngine,
    vector: VectorEngine,
    predicate: PredicateEngine,
    tokenizer: Arc<dyn Tokenizer>,
    fusion: ArcSwap<FusionSettings>,
    catalog: RwLock<Vec<ToolMetadata>>,
}

impl HybridEngine {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        embedder: Arc<dyn Embedder>,
        settings: &HybridSettings,
    ) -> Result<Self, BridgeError> {
        let fusion = FusionSettings::from_settings(settings)?;
        Ok(Self {
            lexical: LexicalEngine::new(Arc::new(SimpleTokenizer::new(
                TokenizerConfig::default(),
            ))),
            vector: VectorEngine::new(embedder),
            predicate: PredicateEngine::new(),
            tokenizer,
            fusion: ArcSwap::from_pointee(fusion),
            catalog: RwLock::new(Vec::new()),
        })
    }

    /// Swap fusion parameters. No re-index is required.
    #[allow(dead_code)]
    pub fn reconfigure(&self, settings: &HybridSettings) -> Result<(), BridgeError> {
        self.fusion
            .store(Arc::new(FusionSettings::from_settings(settings)?));
        Ok(())
    }

    /// Pre-tokenized lexical view of one tool.
    fn project(&self, meta: &ToolMetadata) -> ToolMetadata {
        ToolMetadata {
            id: meta.id.clone(),
            name: self.tokenizer.tokenize_for_fts(&meta.name),
            description: self.tokenizer.tokenize_for_fts(&meta.description),
            method: meta.method.clone(),
            path: self.tokenizer.tokenize_for_fts(&meta.path),
            tags: meta.tags.clone(),
        }
    }
}

#[async_trait]
impl SearchEngine for HybridEngine {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn index(&self, tools: &[ToolMetadata]) -> Result<(), BridgeError> {
        let projected: Vec<ToolMetadata> = tools.iter().map(|m| self.project(m)).collect();
        self.lexical.index(&projected).await?;
        self.vector.index(tools).await?;
        self.predicate.index(tools).await?;
        *self.catalog.write().unwrap_or_else(|e| e.into_inner()) = tools.to_vec();
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<ToolMetadata>, BridgeError> {
        let (by_id, insertion, empty_result) = {
            let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
            let by_id: HashMap<String, ToolMetadata> = catalog
                .iter()
                .map(|m| (m.id.clone(), m.clone()))
                .collect();
            let insertion: HashMap<String, usize> = catalog
                .iter()
                .enumerate()
                .map(|(i, m)| (m.id.clone(), i))
                .collect();
            (by_id, insertion, empty_query_slice(&catalog))
        };
        if by_id.is_empty() || query.trim().is_empty() {
            return Ok(empty_result);
        }

        // The lexical side gets the FTS-tokenized query; the vector side the
        // original text. Both run concurrently and are joined before fusing.
        let fts_query = self.tokenizer.tokenize_for_fts(query);
        let (lexical_result, vector_result) =
            tokio::join!(self.lexical.search(&fts_query), self.vector.search(query));

        let (lexical_hits, vector_hits) = match (lexical_result, vector_result) {
            (Ok(l), Ok(v)) => (l, v),
            (Ok(l), Err(e)) => {
                warn!(error = %e, "vector sub-search failed, degraded to lexical only");
                (l, Vec::new())
            }
            (Err(e), Ok(v)) => {
                warn!(error = %e, "lexical sub-search failed, degraded to vector only");
                (Vec::new(), v)
            }
            (Err(lexical_err), Err(vector_err)) => {
                return Err(BridgeError::Index(format!(
                    "both sub-searches failed: lexical: {lexical_err}; vector: {vector_err}"
                )));
            }
        };

        let lexical_ids: Vec<&str> = lexical_hits.iter().map(|m| m.id.as_str()).collect();
        let vector_ids: Vec<&str> = vector_hits.iter().map(|m| m.id.as_str()).collect();

        let fusion = self.fusion.load();
        let mut scores: HashMap<&str, f64> = HashMap::new();
        match fusion.strategy {
            FusionKind::Rrf => {
                // score(d) = sum over lists of 1 / (k + rank), rank 1-based.
                for ids in [&lexical_ids, &vector_ids] {
                    for (rank, id) in ids.iter().enumerate() {
                        *scores.entry(*id).or_default() +=
                            1.0 / (fusion.rrf_k + rank as f64 + 1.0);
                    }
                }
            }
            FusionKind::Weighted => {
                // Each list normalized to [0,1] by (N - rank) / N, rank 1-based.
                let w = fusion.vector_weight;
                let n = lexical_ids.len() as f64;
                for (rank, id) in lexical_ids.iter().enumerate() {
                    let s = (n - (rank as f64 + 1.0)) / n.max(1.0);
                    *scores.entry(*id).or_default() += (1.0 - w) * s;
                }
                let n = vector_ids.len() as f64;
                for (rank, id) in vector_ids.iter().enumerate() {
                    let s = (n - (rank as f64 + 1.0)) / n.max(1.0);
                    *scores.entry(*id).or_default() += w * s;
                }
            }
        }

        let mut fused: Vec<(&str, f64)> = scores.into_iter().collect();
        fused.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let ia = insertion.get(a.0).copied().unwrap_or(usize::MAX);
                    let ib = insertion.get(b.0).copied().unwrap_or(usize::MAX);
                    ia.cmp(&ib)
                })
        });
        fused.truncate(fusion.top_k);

        let mut results: Vec<ToolMetadata> = fused
            .into_iter()
            .filter_map(|(id, _)| by_id.get(id).cloned())
            .collect();

        // Boolean mask preserving fused order, not predicate insertion order.
        if let Some(filter) = &fusion.predicate_filter {
            results.retain(|meta| filter.matches(meta));
        }
        Ok(results)
    }

    fn close(&self) {
        self.lexical.close();
        self.vector.close();
        self.predicate.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingConfig, TfIdfEmbedder};
    use crate::testutil::{FlakyEmbedder, make_meta_with_description};
    use crate::tokenize::CjkTokenizer;

    fn catalog() -> Vec<ToolMetadata> {
        vec![
            make_meta_with_description(
                "a",
                "a",
                "pet store api for managing pets",
                "GET",
                "/a",
                &[],
            ),
            make_meta_with_description("b", "b", "user management", "GET", "/b", &[]),
            make_meta_with_description("c", "c", "order processing", "POST", "/c", &[]),
        ]
    }

    fn simple_tokenizer() -> Arc<dyn Tokenizer> {
        Arc::new(SimpleTokenizer::new(TokenizerConfig::default()))
    }

    fn tfidf() -> Arc<TfIdfEmbedder> {
        Arc::new(TfIdfEmbedder::new(
            simple_tokenizer(),
            EmbeddingConfig::default(),
        ))
    }

    async fn engine_with(settings: &HybridSettings) -> HybridEngine {
        let engine = HybridEngine::new(simple_tokenizer(), tfidf(), settings).unwrap();
        engine.index(&catalog()).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_rrf_fusion_ranks_pet_api_first() {
        let engine = engine_with(&HybridSettings::default()).await;
        let results = engine.search("pet api").await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn test_weighted_fusion() {
        let engine = engine_with(&HybridSettings {
            fusion: FusionKind::Weighted,
            vector_weight: 0.5,
            ..Default::default()
        })
        .await;
        let results = engine.search("pet api").await.unwrap();
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn test_empty_query_lists_catalog() {
        let engine = engine_with(&HybridSettings::default()).await;
        let results = engine.search("").await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn test_empty_catalog_returns_empty() {
        let engine =
            HybridEngine::new(simple_tokenizer(), tfidf(), &HybridSettings::default()).unwrap();
        let results = engine.search("pet").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_when_vector_side_fails() {
        let flaky = Arc::new(FlakyEmbedder::new());
        let engine = HybridEngine::new(
            simple_tokenizer(),
            Arc::clone(&flaky) as Arc<dyn Embedder>,
            &HybridSettings::default(),
        )
        .unwrap();
        engine.index(&catalog()).await.unwrap();

        // Query-time embeddings now fail; the lexical side carries the search.
        flaky.set_failing(true);
        let results = engine.search("pet").await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn test_predicate_filter_masks_fused_order() {
        let engine = engine_with(&HybridSettings {
            predicate_filter: Some(r#"MethodIs("GET")"#.to_string()),
            ..Default::default()
        })
        .await;

        let results = engine.search("management processing").await.unwrap();
        assert!(results.iter().any(|m| m.id == "b"));
        assert!(results.iter().all(|m| m.method == "GET"));
        assert!(!results.iter().any(|m| m.id == "c"));
    }

    #[tokio::test]
    async fn test_invalid_predicate_filter_rejected() {
        let err = HybridEngine::new(
            simple_tokenizer(),
            tfidf(),
            &HybridSettings {
                predicate_filter: Some("Bogus(".to_string()),
                ..Default::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, BridgeError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_reconfigure_fusion_without_reindex() {
        let engine = engine_with(&HybridSettings::default()).await;
        engine
            .reconfigure(&HybridSettings {
                fusion: FusionKind::Weighted,
                vector_weight: 2.5, // clamped to 1.0
                top_k: 1,
                ..Default::default()
            })
            .unwrap();

        let results = engine.search("pet api").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn test_cjk_catalog_through_hybrid() {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(CjkTokenizer::new(TokenizerConfig::default()));
        let tfidf = Arc::new(TfIdfEmbedder::new(
            Arc::clone(&tokenizer),
            EmbeddingConfig::default(),
        ));
        let engine =
            HybridEngine::new(tokenizer, tfidf, &HybridSettings::default()).unwrap();
        let catalog = vec![
            make_meta_with_description(
                "users_list",
                "用户列表",
                "获取用户列表",
                "GET",
                "/users",
                &[],
            ),
            make_meta_with_description(
                "orders_list",
                "订单列表",
                "获取订单列表",
                "GET",
                "/orders",
                &[],
            ),
        ];
        engine.index(&catalog).await.unwrap();

        let results = engine.search("用户").await.unwrap();
        assert!(results.iter().any(|m| m.id == "users_list"));
    }
}

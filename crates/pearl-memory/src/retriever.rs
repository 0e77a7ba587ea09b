//! Ranked, budgeted memory retrieval: embed the query, score candidates by
//! cosine similarity, apply a recency boost, sort, truncate, and greedily fit a
//! token budget.

use std::sync::Arc;

use pearl_backends::EmbeddingProvider;
use pearl_core::{Memory, MemoryType, ScoredMemory, cosine_similarity, time::now_unix_secs};
use pearl_store::{OrderBy, QueryFilter, Store};

#[derive(Debug, thiserror::Error)]
pub enum RetrieverError {
    #[error("store error: {0}")]
    Store(#[from] pearl_store::StoreError),
    #[error("embedding error: {0}")]
    Embedding(#[from] pearl_backends::BackendError),
    #[error("{0}")]
    Similarity(#[from] pearl_core::SimilarityError),
}

#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    pub types: Vec<MemoryType>,
    pub limit: u32,
    pub min_score: f64,
    /// ~4 chars/token budget for the greedy content-length fit.
    pub token_budget: u32,
    pub recency_boost_enabled: bool,
    pub half_life_hours: f64,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        RetrieveOptions {
            types: Vec::new(),
            limit: 10,
            min_score: 0.3,
            token_budget: 2000,
            recency_boost_enabled: true,
            half_life_hours: 72.0,
        }
    }
}

/// Exponential decay on age in hours: `exp(-age_hours / half_life_hours)`,
/// monotonic and bounded in `(0, 1]`. Ages are computed from `accessed_at` when
/// present (falling back to `created_at`), since the boost rewards memories
/// touched recently, not merely created long ago.
fn recency_boost(memory: &Memory, now: u64, half_life_hours: f64) -> f64 {
    let reference = memory.accessed_at.unwrap_or(memory.created_at);
    let age_hours = (now.saturating_sub(reference)) as f64 / 3600.0;
    (-age_hours / half_life_hours).exp()
}

pub struct Retriever {
    store: Arc<Store>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(store: Arc<Store>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Retriever { store, embedder }
    }

    pub async fn retrieve(
        &self,
        agent_id: &str,
        query: &str,
        opts: &RetrieveOptions,
    ) -> Result<Vec<ScoredMemory>, RetrieverError> {
        let candidates = self.store.query(&QueryFilter {
            agent_id: Some(agent_id.to_string()),
            types: opts.types.clone(),
            has_embedding: Some(true),
            order_by: OrderBy::CreatedAt,
            ..Default::default()
        })?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let now = now_unix_secs();

        let mut scored: Vec<ScoredMemory> = Vec::new();
        for m in candidates {
            let Some(embedding) = m.embedding.as_ref() else {
                continue;
            };
            let raw_score = cosine_similarity(embedding, &query_embedding)?;
            if raw_score < opts.min_score {
                continue;
            }
            let final_score = if opts.recency_boost_enabled {
                raw_score * recency_boost(&m, now, opts.half_life_hours)
            } else {
                raw_score
            };
            scored.push(ScoredMemory {
                memory: m,
                score: final_score,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
        });
        scored.truncate(opts.limit as usize);

        let budgeted = apply_token_budget(scored, opts.token_budget);

        let ids: Vec<String> = budgeted.iter().map(|sm| sm.memory.id.clone()).collect();
        if let Err(e) = self.store.record_access(&ids) {
            tracing::warn!(error = %e, "failed to record memory access after retrieval");
        }

        Ok(budgeted)
    }
}

/// Greedily includes memories in rank order while the cumulative content length
/// (at ~4 chars/token) stays within `token_budget`.
fn apply_token_budget(candidates: Vec<ScoredMemory>, token_budget: u32) -> Vec<ScoredMemory> {
    let mut used_tokens: u64 = 0;
    let mut out = Vec::new();
    for sm in candidates {
        let est_tokens = (sm.memory.content.len() as u64).div_ceil(4);
        if used_tokens + est_tokens > token_budget as u64 && !out.is_empty() {
            break;
        }
        used_tokens += est_tokens;
        out.push(sm);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pearl_core::{MemoryType, Scope};
    use std::collections::BTreeSet;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, pearl_backends::BackendError> {
            Ok(self.0.clone())
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, pearl_backends::BackendError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
        fn dimensions(&self) -> usize {
            self.0.len()
        }
    }

    fn memory(id: &str, embedding: Vec<f32>, created_at: u64) -> Memory {
        Memory {
            id: id.to_string(),
            agent_id: "nova".to_string(),
            memory_type: MemoryType::Fact,
            content: "the user prefers dark mode".to_string(),
            tags: BTreeSet::new(),
            embedding: Some(embedding),
            confidence: 0.9,
            created_at,
            updated_at: created_at,
            accessed_at: Some(created_at),
            access_count: 0,
            expires_at: None,
            source_session_id: None,
            source_message_id: None,
            scope: Scope::Agent,
            scope_confidence: 1.0,
            target_agent_id: None,
            scope_reasoning: None,
        }
    }

    #[tokio::test]
    async fn retrieval_scores_ranks_and_budgets() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create(&memory("1", vec![1.0, 0.0], 1000)).unwrap();
        store.create(&memory("2", vec![0.0, 1.0], 2000)).unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FixedEmbedder(vec![1.0, 0.0]));
        let retriever = Retriever::new(store, embedder);

        let results = retriever
            .retrieve(
                "nova",
                "dark mode",
                &RetrieveOptions {
                    recency_boost_enabled: false,
                    min_score: 0.5,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, "1");
    }

    #[tokio::test]
    async fn min_similarity_near_one_on_dissimilar_vectors_returns_empty() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create(&memory("1", vec![1.0, 0.0], 1000)).unwrap();
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FixedEmbedder(vec![0.0, 1.0]));
        let retriever = Retriever::new(store, embedder);
        let results = retriever
            .retrieve("nova", "q", &RetrieveOptions { min_score: 0.99, ..Default::default() })
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn token_budget_truncates_but_always_keeps_first_item() {
        let huge = memory("1", vec![1.0], 1000);
        let mut huge = huge;
        huge.content = "x".repeat(10_000);
        let scored = vec![ScoredMemory { memory: huge, score: 1.0 }];
        let out = apply_token_budget(scored, 1);
        assert_eq!(out.len(), 1, "a single oversized item is still included");
    }
}

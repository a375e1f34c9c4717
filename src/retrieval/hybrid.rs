//! Tiered fallback retriever

use super::{RetrievalTrace, RetrievedDocument, SearchTier, TierAttempt, TierOutcome};
use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::store::{DocumentStore, MovieMatch, StoreError};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs KEYWORD, SEMANTIC and SIMPLE tiers in order until one finds documents
///
/// Failures inside a tier never escape: they demote the query to the next
/// tier and are logged.
pub struct HybridRetriever {
    store: Arc<dyn DocumentStore>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    candidate_pool_size: usize,
}

impl HybridRetriever {
    /// Create a retriever
    ///
    /// Without an embedder the SEMANTIC tier always fails over to SIMPLE.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            candidate_pool_size: config.candidate_pool_size,
        }
    }

    /// Retrieve up to `limit` documents for `query`
    pub async fn retrieve(&self, query: &str, limit: usize) -> Vec<RetrievedDocument> {
        self.retrieve_traced(query, limit).await.documents
    }

    /// Retrieve and report every tier that was attempted
    pub async fn retrieve_traced(&self, query: &str, limit: usize) -> RetrievalTrace {
        let mut attempts = Vec::with_capacity(3);

        for tier in [SearchTier::Keyword, SearchTier::Semantic] {
            let outcome = self.run_tier(tier, query, limit).await;
            attempts.push(TierAttempt {
                tier,
                status: outcome.status(),
            });

            match outcome {
                TierOutcome::Found(documents) => {
                    info!("{} tier returned {} documents", tier, documents.len());
                    return RetrievalTrace {
                        tier,
                        attempts,
                        documents,
                    };
                }
                TierOutcome::Empty => info!("{} tier found nothing, falling back", tier),
                TierOutcome::Failed(reason) => {
                    warn!("{} tier failed, falling back: {}", tier, reason)
                }
            }
        }

        let outcome = self.run_tier(SearchTier::Simple, query, limit).await;
        attempts.push(TierAttempt {
            tier: SearchTier::Simple,
            status: outcome.status(),
        });

        let documents = match outcome {
            TierOutcome::Found(documents) => documents,
            TierOutcome::Empty => Vec::new(),
            TierOutcome::Failed(reason) => {
                warn!("SIMPLE tier failed: {}", reason);
                Vec::new()
            }
        };
        info!("SIMPLE tier returned {} documents", documents.len());

        RetrievalTrace {
            tier: SearchTier::Simple,
            attempts,
            documents,
        }
    }

    async fn run_tier(&self, tier: SearchTier, query: &str, limit: usize) -> TierOutcome {
        let result = match tier {
            SearchTier::Keyword => self.store.keyword_search(query, limit).await,
            SearchTier::Semantic => match self.embed(query).await {
                Ok(vector) => {
                    let pool = self.candidate_pool_size.max(limit);
                    self.store.vector_search(&vector, limit, pool).await
                }
                Err(reason) => return TierOutcome::Failed(reason),
            },
            SearchTier::Simple => {
                let terms: Vec<String> = query.split_whitespace().map(str::to_string).collect();
                self.store.substring_search(&terms, limit).await
            }
        };

        outcome(tier, result)
    }

    async fn embed(&self, query: &str) -> Result<Vec<f32>, String> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| "no embedding provider configured".to_string())?;

        debug!("Embedding query with {}", embedder.model_name());
        embedder
            .embed(query)
            .await
            .map_err(|e| format!("embedding failed: {}", e))
    }
}

fn outcome(tier: SearchTier, result: Result<Vec<MovieMatch>, StoreError>) -> TierOutcome {
    match result {
        Ok(matches) if matches.is_empty() => TierOutcome::Empty,
        Ok(matches) => TierOutcome::Found(
            matches
                .into_iter()
                .map(|m| RetrievedDocument::from_match(m, tier))
                .collect(),
        ),
        Err(e) => TierOutcome::Failed(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embedding::{EmbeddingError, EmbeddingVector};
    use crate::retrieval::TierStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn movie(title: &str, score: f32) -> MovieMatch {
        MovieMatch {
            id: title.to_lowercase().replace(' ', "-"),
            text: format!("{} plot", title),
            title: title.to_string(),
            year: None,
            genres: Vec::new(),
            cast: Vec::new(),
            score,
        }
    }

    #[derive(Default)]
    struct FakeStore {
        keyword: Vec<MovieMatch>,
        vector: Option<Vec<MovieMatch>>,
        substring: Vec<MovieMatch>,
        keyword_fails: bool,
        vector_calls: AtomicUsize,
        pools: Mutex<Vec<usize>>,
        terms: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentStore for FakeStore {
        async fn keyword_search(
            &self,
            _query: &str,
            limit: usize,
        ) -> Result<Vec<MovieMatch>, StoreError> {
            if self.keyword_fails {
                return Err(StoreError::Connectivity("connection refused".to_string()));
            }
            Ok(self.keyword.iter().take(limit).cloned().collect())
        }

        async fn vector_search(
            &self,
            _query_vector: &[f32],
            limit: usize,
            candidate_pool_size: usize,
        ) -> Result<Vec<MovieMatch>, StoreError> {
            self.vector_calls.fetch_add(1, Ordering::SeqCst);
            self.pools.lock().unwrap().push(candidate_pool_size);
            match &self.vector {
                Some(found) => Ok(found.iter().take(limit).cloned().collect()),
                None => Err(StoreError::Query("index missing".to_string())),
            }
        }

        async fn substring_search(
            &self,
            terms: &[String],
            limit: usize,
        ) -> Result<Vec<MovieMatch>, StoreError> {
            *self.terms.lock().unwrap() = terms.to_vec();
            Ok(self.substring.iter().take(limit).cloned().collect())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct FakeEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl FakeEmbedder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<EmbeddingVector, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EmbeddingError::MalformedEmbedding("empty embedding".to_string()));
            }
            Ok(vec![0.1, 0.2, 0.3])
        }

        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3]).collect())
        }

        fn dimension(&self) -> usize {
            3
        }

        fn model_name(&self) -> &str {
            "fake"
        }
    }

    fn retriever(store: Arc<FakeStore>, embedder: Option<Arc<FakeEmbedder>>) -> HybridRetriever {
        let embedder = embedder.map(|e| e as Arc<dyn EmbeddingProvider>);
        HybridRetriever::new(store, embedder, &Config::default().retrieval)
    }

    #[tokio::test]
    async fn test_keyword_hit_skips_embedding() {
        let store = Arc::new(FakeStore {
            keyword: vec![movie("Robin Hood", 7.5), movie("The Black Pirate", 3.0)],
            ..Default::default()
        });
        let embedder = FakeEmbedder::new(false);

        let docs = retriever(store.clone(), Some(embedder.clone()))
            .retrieve("Robin Hood", 3)
            .await;

        assert_eq!(docs.len(), 2);
        assert!(docs.iter().all(|d| d.source_tier == SearchTier::Keyword));
        assert_eq!(docs[0].title, "Robin Hood");
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.vector_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_semantic_after_empty_keyword() {
        let store = Arc::new(FakeStore {
            vector: Some(vec![movie("Metropolis", 0.82), movie("Nosferatu", 0.71)]),
            ..Default::default()
        });
        let embedder = FakeEmbedder::new(false);

        let trace = retriever(store.clone(), Some(embedder.clone()))
            .retrieve_traced("xylophone zebra quantum", 3)
            .await;

        assert_eq!(trace.tier, SearchTier::Semantic);
        assert_eq!(trace.documents[0].title, "Metropolis");
        assert!(trace.documents[0].score >= trace.documents[1].score);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.pools.lock().unwrap().as_slice(), &[150]);
        assert_eq!(trace.attempts[0].status, TierStatus::Empty);
    }

    #[tokio::test]
    async fn test_embedding_failure_demotes_to_simple() {
        let store = Arc::new(FakeStore {
            vector: Some(vec![movie("Metropolis", 0.82)]),
            substring: vec![movie("The General", 0.0)],
            ..Default::default()
        });
        let embedder = FakeEmbedder::new(true);

        let trace = retriever(store.clone(), Some(embedder))
            .retrieve_traced("xylophone zebra quantum", 3)
            .await;

        assert_eq!(trace.tier, SearchTier::Simple);
        assert!(!trace.documents.is_empty());
        assert!(trace
            .documents
            .iter()
            .all(|d| d.source_tier == SearchTier::Simple));
        assert_eq!(store.vector_calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            trace.attempts[1].status,
            TierStatus::Failed { .. }
        ));
        assert_eq!(
            store.terms.lock().unwrap().as_slice(),
            &["xylophone", "zebra", "quantum"]
        );
    }

    #[tokio::test]
    async fn test_store_failures_demote() {
        let store = Arc::new(FakeStore {
            keyword_fails: true,
            vector: None,
            substring: vec![movie("Gertie the Dinosaur", 0.0)],
            ..Default::default()
        });

        let trace = retriever(store.clone(), Some(FakeEmbedder::new(false)))
            .retrieve_traced("dinosaur", 3)
            .await;

        assert_eq!(trace.tier, SearchTier::Simple);
        assert_eq!(trace.documents[0].title, "Gertie the Dinosaur");
        assert_eq!(trace.attempts.len(), 3);
        assert_eq!(store.vector_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_semantic_empty_falls_to_simple() {
        let store = Arc::new(FakeStore {
            vector: Some(Vec::new()),
            substring: vec![movie("The General", 0.5)],
            ..Default::default()
        });

        let docs = retriever(store, Some(FakeEmbedder::new(false)))
            .retrieve("locomotive", 3)
            .await;

        assert_eq!(docs[0].source_tier, SearchTier::Simple);
    }

    #[tokio::test]
    async fn test_no_embedder_goes_to_simple() {
        let store = Arc::new(FakeStore {
            vector: Some(vec![movie("Metropolis", 0.9)]),
            substring: vec![movie("The General", 0.0)],
            ..Default::default()
        });

        let docs = retriever(store.clone(), None).retrieve("robots", 3).await;
        assert_eq!(docs[0].source_tier, SearchTier::Simple);
        assert_eq!(store.vector_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pool_never_below_limit() {
        let store = Arc::new(FakeStore {
            vector: Some(vec![movie("Metropolis", 0.9)]),
            ..Default::default()
        });

        retriever(store.clone(), Some(FakeEmbedder::new(false)))
            .retrieve("robots", 500)
            .await;
        assert_eq!(store.pools.lock().unwrap().as_slice(), &[500]);
    }
}

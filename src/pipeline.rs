//! Wiring of store, embedder, retriever and composer for one process

use crate::config::Config;
use crate::conversation::ConversationalAdapter;
use crate::embedding::{build_provider, BatchProcessor, BatchResult, EmbeddingProvider};
use crate::error::Result;
use crate::generation::{Answer, AnswerComposer, EndpointGenerator, TextGenerator};
use crate::retrieval::{HybridRetriever, RetrievalTrace};
use crate::store::StoreBackend;
use std::sync::Arc;

/// Long-lived components shared by every query
pub struct Pipeline {
    store: StoreBackend,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    retriever: Arc<HybridRetriever>,
    composer: Arc<AnswerComposer>,
    config: Config,
}

impl Pipeline {
    /// Open the configured store and build the providers
    ///
    /// An embedding provider that fails to initialize is logged and left
    /// out; retrieval then skips straight from KEYWORD to SIMPLE.
    pub async fn open(config: Config, offline: bool) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let store = StoreBackend::open(&config, &data_dir).await?;

        let embedder = match build_provider(&config.embedding) {
            Ok(provider) => Some(provider),
            Err(e) => {
                tracing::warn!("Embedding provider unavailable, semantic search disabled: {}", e);
                None
            }
        };

        let generator = if offline {
            None
        } else {
            EndpointGenerator::from_config(&config.generation)?
                .map(|g| Arc::new(g) as Arc<dyn TextGenerator>)
        };

        Ok(Self::from_parts(store, embedder, generator, config))
    }

    /// Assemble a pipeline from already-built components
    pub fn from_parts(
        store: StoreBackend,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        generator: Option<Arc<dyn TextGenerator>>,
        config: Config,
    ) -> Self {
        let retriever = Arc::new(HybridRetriever::new(
            store.documents(),
            embedder.clone(),
            &config.retrieval,
        ));
        let composer = Arc::new(AnswerComposer::new(&config.generation, generator));

        Self {
            store,
            embedder,
            retriever,
            composer,
            config,
        }
    }

    pub fn store(&self) -> &StoreBackend {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.config.retrieval.limit)
    }

    /// Retrieve documents, reporting the tiers attempted
    pub async fn query(&self, query: &str, limit: Option<usize>) -> RetrievalTrace {
        self.retriever.retrieve_traced(query, self.limit(limit)).await
    }

    /// Retrieve and compose an answer
    pub async fn ask(&self, question: &str, limit: Option<usize>) -> Result<Answer> {
        let documents = self.retriever.retrieve(question, self.limit(limit)).await;
        Ok(self.composer.compose(question, documents).await?)
    }

    /// Conversational adapter over this pipeline
    pub fn adapter(&self) -> ConversationalAdapter {
        ConversationalAdapter::new(
            self.retriever.clone(),
            self.composer.clone(),
            self.config.retrieval.limit,
            &self.config.conversation,
        )
    }

    /// Embed stored documents that have no vector yet
    pub async fn backfill(&self, max_documents: Option<usize>) -> Result<BatchResult> {
        let provider = self.embedder.clone().ok_or_else(|| {
            crate::error::MarqueeError::Config(
                "Backfill needs an embedding provider; check the [embedding] section".to_string(),
            )
        })?;

        let processor =
            BatchProcessor::new(provider, self.store.backfill(), self.config.embedding.batch_size);
        Ok(processor.run(max_documents).await?)
    }
}

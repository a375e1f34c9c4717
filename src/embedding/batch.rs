/// Batch backfill of missing document vectors
use super::{EmbeddingError, EmbeddingProvider};
use crate::store::{PendingDocument, StoreError, VectorBackfill};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one backfill run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchResult {
    /// Documents that lacked a vector when the run started
    pub pending: usize,
    pub processed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Embeds stored documents that carry text but no vector
///
/// Texts are embedded `batch_size` at a time; a failing chunk is logged and
/// counted, and the run moves on to the next chunk.
pub struct BatchProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorBackfill>,
    batch_size: usize,
}

impl BatchProcessor {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorBackfill>,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Embed every pending document, up to `max_documents` when given
    pub async fn run(&self, max_documents: Option<usize>) -> Result<BatchResult, StoreError> {
        let start = std::time::Instant::now();

        let mut items = self.store.pending_vectors().await?;
        let pending = items.len();
        if let Some(max) = max_documents {
            items.truncate(max);
        }

        info!(
            "Backfilling {} of {} documents with {}",
            items.len(),
            pending,
            self.provider.model_name()
        );

        let mut processed = 0;
        let mut failed = 0;

        for chunk in items.chunks(self.batch_size) {
            match self.process_chunk(chunk).await {
                Ok(stored) => {
                    processed += stored;
                    failed += chunk.len() - stored;
                    debug!("Stored {} of {} vectors in chunk", stored, chunk.len());
                }
                Err(e) => {
                    warn!("Failed to embed chunk of {}: {}", chunk.len(), e);
                    failed += chunk.len();
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Backfill complete: {} processed, {} failed, {}ms",
            processed, failed, duration_ms
        );

        Ok(BatchResult {
            pending,
            processed,
            failed,
            duration_ms,
        })
    }

    /// Embed one chunk and store each vector; returns the number stored
    async fn process_chunk(&self, chunk: &[PendingDocument]) -> Result<usize, EmbeddingError> {
        let texts: Vec<String> = chunk.iter().map(|item| item.text.clone()).collect();

        let embeddings = self.provider.embed_batch(&texts).await?;

        if embeddings.len() != chunk.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                chunk.len(),
                embeddings.len()
            )));
        }

        let mut stored = 0;
        for (item, embedding) in chunk.iter().zip(embeddings.iter()) {
            match self.store.store_vector(&item.id, embedding).await {
                Ok(()) => stored += 1,
                Err(e) => warn!("Failed to store vector for {}: {}", item.id, e),
            }
        }

        Ok(stored)
    }
}

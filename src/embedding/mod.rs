/// Embedding generation
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - EndpointEmbeddingProvider for a remote embedding service ("online")
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2, 384-dim, "offline")
/// - Shape normalization of raw service responses into flat vectors
/// - Batch backfill of stored documents that lack a vector
mod batch;
mod endpoint;
mod normalize;
mod provider;

pub use batch::{BatchProcessor, BatchResult};
pub use endpoint::EndpointEmbeddingProvider;
pub use normalize::{normalize_embedding, validate_vector, DEFAULT_MAX_DEPTH};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};

use crate::config::EmbeddingConfig;
use std::sync::Arc;

/// Flat embedding vector
pub type EmbeddingVector = Vec<f32>;

/// Build the provider selected by `embedding.mode`
pub fn build_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    match config.mode.as_str() {
        "online" => Ok(Arc::new(EndpointEmbeddingProvider::new(config)?)),
        "offline" => {
            let provider = FastEmbedProvider::new(&config.model)?;
            if provider.dimension() != config.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: config.dimension,
                    actual: provider.dimension(),
                });
            }
            Ok(Arc::new(provider))
        }
        other => Err(EmbeddingError::InitializationError(format!(
            "Unsupported embedding mode: {}",
            other
        ))),
    }
}

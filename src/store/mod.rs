//! Document store adapters
//!
//! Every backend answers the same three query shapes:
//! - keyword (full-text) search scored by the store's text ranking
//! - approximate nearest-neighbor search over a precomputed vector field
//! - case-insensitive substring search with an arbitrary-sample last resort
//!
//! Results carry a fixed projection (id, text, title, year, genres, cast)
//! and a relevance score, ordered by descending score.

#[cfg(feature = "atlas")]
pub mod atlas;
pub mod local;

#[cfg(feature = "atlas")]
pub use atlas::AtlasStore;
pub use local::{IngestStats, LocalStore, StoreStats};

use crate::config::Config;
use crate::error::{MarqueeError, Result};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unreachable: {0}")]
    Connectivity(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One projected record returned by a store query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieMatch {
    /// Opaque document identifier
    pub id: String,
    /// Primary content field
    pub text: String,
    pub title: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub cast: Vec<String>,
    /// Store-native relevance score
    pub score: f32,
}

/// A stored document whose vector field has not been populated yet
#[derive(Debug, Clone)]
pub struct PendingDocument {
    pub id: String,
    pub text: String,
}

/// Read-only query surface used by the retriever
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Full-text search over all indexed fields
    async fn keyword_search(&self, query: &str, limit: usize)
        -> std::result::Result<Vec<MovieMatch>, StoreError>;

    /// Approximate nearest-neighbor search
    ///
    /// `candidate_pool_size` must be at least `limit`.
    async fn vector_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        candidate_pool_size: usize,
    ) -> std::result::Result<Vec<MovieMatch>, StoreError>;

    /// Case-insensitive substring search
    ///
    /// Tries the text field, then the fallback fields, then returns an
    /// arbitrary sample of up to `limit` documents.
    async fn substring_search(
        &self,
        terms: &[String],
        limit: usize,
    ) -> std::result::Result<Vec<MovieMatch>, StoreError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Write surface used by the vector backfill job
#[async_trait]
pub trait VectorBackfill: Send + Sync {
    /// Documents that carry text but no vector
    async fn pending_vectors(&self) -> std::result::Result<Vec<PendingDocument>, StoreError>;

    /// Set the vector field of one document
    async fn store_vector(&self, id: &str, vector: &[f32])
        -> std::result::Result<(), StoreError>;
}

/// Reject ANN calls whose candidate pool cannot cover the limit
pub fn check_candidate_pool(
    limit: usize,
    candidate_pool_size: usize,
) -> std::result::Result<(), StoreError> {
    if candidate_pool_size < limit {
        return Err(StoreError::InvalidArgument(format!(
            "candidate pool ({}) smaller than limit ({})",
            candidate_pool_size, limit
        )));
    }
    Ok(())
}

/// Lowercase, trim and dedupe substring search terms, dropping empties
pub fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    terms
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Case-insensitive alternation of the terms, each matched literally
pub fn term_pattern(terms: &[String]) -> std::result::Result<Regex, StoreError> {
    let alternation = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    RegexBuilder::new(&alternation)
        .case_insensitive(true)
        .build()
        .map_err(|e| StoreError::InvalidArgument(format!("Invalid search terms: {}", e)))
}

/// Share of distinct terms found in `haystack`, `None` when none match
pub fn term_score(pattern: &Regex, haystack: &str, term_count: usize) -> Option<f32> {
    let matched: HashSet<String> = pattern
        .find_iter(haystack)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    if matched.is_empty() || term_count == 0 {
        return None;
    }
    Some(matched.len().min(term_count) as f32 / term_count as f32)
}

/// Concrete backend selected by `store.backend`
#[derive(Clone)]
pub enum StoreBackend {
    Local(Arc<LocalStore>),
    #[cfg(feature = "atlas")]
    Atlas(Arc<AtlasStore>),
}

impl StoreBackend {
    /// Open the configured backend
    pub async fn open(config: &Config, data_dir: &Path) -> Result<Self> {
        match config.store.backend.as_str() {
            "local" => {
                let store = LocalStore::open(data_dir, &config.store, config.embedding.dimension)?;
                Ok(Self::Local(Arc::new(store)))
            }
            #[cfg(feature = "atlas")]
            "atlas" => {
                let store = AtlasStore::connect(&config.store).await?;
                Ok(Self::Atlas(Arc::new(store)))
            }
            other => Err(MarqueeError::Config(format!(
                "Unsupported store backend: {}",
                other
            ))),
        }
    }

    pub fn documents(&self) -> Arc<dyn DocumentStore> {
        match self {
            Self::Local(store) => store.clone() as Arc<dyn DocumentStore>,
            #[cfg(feature = "atlas")]
            Self::Atlas(store) => store.clone() as Arc<dyn DocumentStore>,
        }
    }

    pub fn backfill(&self) -> Arc<dyn VectorBackfill> {
        match self {
            Self::Local(store) => store.clone() as Arc<dyn VectorBackfill>,
            #[cfg(feature = "atlas")]
            Self::Atlas(store) => store.clone() as Arc<dyn VectorBackfill>,
        }
    }

    /// Embedded store, when that backend is active
    pub fn local(&self) -> Option<&Arc<LocalStore>> {
        match self {
            Self::Local(store) => Some(store),
            #[cfg(feature = "atlas")]
            Self::Atlas(_) => None,
        }
    }
}

//! Hybrid retrieval with tiered fallback
//!
//! A query is tried against keyword search first, then vector search over
//! the query embedding, then substring search. The first tier that yields
//! documents wins; its results are returned in store order, tagged with
//! the tier that produced them.

mod hybrid;

pub use hybrid::HybridRetriever;

use crate::store::MovieMatch;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Retrieval tiers in fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SearchTier {
    Keyword,
    Semantic,
    Simple,
}

impl fmt::Display for SearchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Keyword => "KEYWORD",
            Self::Semantic => "SEMANTIC",
            Self::Simple => "SIMPLE",
        };
        f.write_str(name)
    }
}

/// One document returned to callers, whatever tier found it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub text: String,
    pub title: String,
    pub score: f32,
    pub source_tier: SearchTier,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub cast: Vec<String>,
}

impl RetrievedDocument {
    pub fn from_match(found: MovieMatch, tier: SearchTier) -> Self {
        Self {
            id: found.id,
            text: found.text,
            title: found.title,
            score: found.score,
            source_tier: tier,
            year: found.year,
            genres: found.genres,
            cast: found.cast,
        }
    }
}

/// Result of running one tier
#[derive(Debug, Clone)]
pub enum TierOutcome {
    Found(Vec<RetrievedDocument>),
    Empty,
    Failed(String),
}

impl TierOutcome {
    fn status(&self) -> TierStatus {
        match self {
            Self::Found(docs) => TierStatus::Found { count: docs.len() },
            Self::Empty => TierStatus::Empty,
            Self::Failed(reason) => TierStatus::Failed {
                reason: reason.clone(),
            },
        }
    }
}

/// Serializable summary of a tier outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TierStatus {
    Found { count: usize },
    Empty,
    Failed { reason: String },
}

/// One tier that was run while answering a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: SearchTier,
    #[serde(flatten)]
    pub status: TierStatus,
}

/// Retrieval result together with how it was reached
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalTrace {
    /// Tier whose results were returned
    pub tier: SearchTier,
    pub attempts: Vec<TierAttempt>,
    pub documents: Vec<RetrievedDocument>,
}

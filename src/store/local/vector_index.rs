/// HNSW vector index for approximate nearest-neighbor search
use crate::embedding::validate_vector;
use crate::store::StoreError;
use hnsw_rs::prelude::*;
use std::sync::RwLock;

const MAX_NB_CONNECTION: usize = 16;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const INITIAL_CAPACITY: usize = 10_000;

/// Neighbor with the movie row id and cosine similarity
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: i64,
    pub score: f32,
}

/// In-memory HNSW index, rebuilt from the database on open
///
/// Scores are cosine similarity (1 - cosine distance).
pub struct VectorIndex {
    index: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    count: RwLock<usize>,
}

impl VectorIndex {
    /// Build an index holding `items`
    pub fn build(dimension: usize, items: &[(i64, Vec<f32>)]) -> Result<Self, StoreError> {
        let capacity = items.len().max(INITIAL_CAPACITY);
        let index = Hnsw::<f32, DistCosine>::new(
            MAX_NB_CONNECTION,
            capacity,
            MAX_LAYER,
            EF_CONSTRUCTION,
            DistCosine,
        );

        let vector_index = Self {
            index,
            dimension,
            count: RwLock::new(0),
        };

        for (id, vector) in items {
            if let Err(e) = check_vector(vector, dimension) {
                tracing::warn!("Skipping stored vector for movie {}: {}", id, e);
                continue;
            }
            vector_index.insert(*id, vector)?;
        }

        Ok(vector_index)
    }

    /// Insert a vector
    ///
    /// Vectors of the wrong size, with non-finite elements or with zero norm
    /// are rejected before they reach the graph.
    pub fn insert(&self, id: i64, vector: &[f32]) -> Result<(), StoreError> {
        check_vector(vector, self.dimension)?;

        self.index.insert((vector, id as usize));

        let mut count = self
            .count
            .write()
            .map_err(|_| StoreError::Index("vector count lock poisoned".to_string()))?;
        *count += 1;

        Ok(())
    }

    /// Search for the `k` nearest neighbors, exploring `ef_search` candidates
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        ef_search: usize,
    ) -> Result<Vec<VectorHit>, StoreError> {
        check_vector(query, self.dimension)?;

        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = self
            .index
            .search(query, k, ef_search.max(k))
            .into_iter()
            .map(|neighbour| VectorHit {
                id: neighbour.d_id as i64,
                score: 1.0 - neighbour.distance,
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        Ok(hits)
    }

    pub fn len(&self) -> usize {
        self.count.read().map(|c| *c).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_vector(vector: &[f32], dimension: usize) -> Result<(), StoreError> {
    validate_vector(vector, dimension).map_err(|e| StoreError::InvalidArgument(e.to_string()))
}

//! Coercion of raw embedding responses into a flat vector
//!
//! Embedding services answer with the vector wrapped in a varying number of
//! single-element sequences (`[v]`, `[[v]]`, `[[[v]]]`), sometimes under an
//! `embedding` or `embeddings` key. Singleton layers are peeled off one at a
//! time up to a fixed depth; whatever remains must be a non-empty sequence of
//! numbers.

use super::{EmbeddingError, EmbeddingVector};
use serde_json::Value;

/// Default number of singleton layers that may be unwrapped
pub const DEFAULT_MAX_DEPTH: usize = 5;

const PAYLOAD_KEYS: [&str; 2] = ["embedding", "embeddings"];

/// Normalize a raw service response into a flat `f32` vector
///
/// # Arguments
/// * `value` - Decoded JSON response (or the part of it holding the vector)
/// * `max_depth` - Maximum number of singleton layers to unwrap
pub fn normalize_embedding(
    value: Value,
    max_depth: usize,
) -> Result<EmbeddingVector, EmbeddingError> {
    unwrap_singletons(extract_payload(value), 0, max_depth)
}

/// Check a vector produced by any provider before it reaches a store
pub fn validate_vector(vector: &[f32], expected_dim: usize) -> Result<(), EmbeddingError> {
    if vector.is_empty() {
        return Err(EmbeddingError::MalformedEmbedding(
            "empty embedding".to_string(),
        ));
    }

    if let Some(idx) = vector.iter().position(|x| !x.is_finite()) {
        return Err(EmbeddingError::MalformedEmbedding(format!(
            "non-finite element at index {}",
            idx
        )));
    }

    if vector.len() != expected_dim {
        return Err(EmbeddingError::DimensionMismatch {
            expected: expected_dim,
            actual: vector.len(),
        });
    }

    // Cosine distance is undefined for a zero vector
    if vector.iter().all(|x| *x == 0.0) {
        return Err(EmbeddingError::MalformedEmbedding(
            "zero-norm embedding".to_string(),
        ));
    }

    Ok(())
}

/// Pull the vector out of an `{"embedding": ...}` style envelope
pub(crate) fn extract_payload(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            for key in PAYLOAD_KEYS {
                if let Some(inner) = map.remove(key) {
                    return inner;
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}

fn unwrap_singletons(
    value: Value,
    depth: usize,
    max_depth: usize,
) -> Result<EmbeddingVector, EmbeddingError> {
    match value {
        Value::Array(items) => {
            if items.len() == 1 && items[0].is_array() {
                if depth >= max_depth {
                    return Err(EmbeddingError::MalformedEmbedding(format!(
                        "nested deeper than {} levels",
                        max_depth
                    )));
                }
                let inner = items.into_iter().next().unwrap_or(Value::Null);
                return unwrap_singletons(inner, depth + 1, max_depth);
            }
            coerce_flat(items)
        }
        other => Err(EmbeddingError::MalformedEmbedding(format!(
            "expected a sequence, got {}",
            kind(&other)
        ))),
    }
}

fn coerce_flat(items: Vec<Value>) -> Result<EmbeddingVector, EmbeddingError> {
    if items.is_empty() {
        return Err(EmbeddingError::MalformedEmbedding(
            "empty embedding".to_string(),
        ));
    }

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            item.as_f64().map(|x| x as f32).ok_or_else(|| {
                EmbeddingError::MalformedEmbedding(format!(
                    "non-numeric element at index {}: {}",
                    idx,
                    kind(item)
                ))
            })
        })
        .collect()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "object",
    }
}

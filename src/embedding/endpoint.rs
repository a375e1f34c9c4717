//! Remote embedding endpoint client
//!
//! Request body: `{"text_inputs": [..texts], ..parameters}`. The response is
//! decoded as JSON and coerced through [`normalize_embedding`].

use super::normalize::extract_payload;
use super::{normalize_embedding, validate_vector, EmbeddingError, EmbeddingProvider, EmbeddingVector};
use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// Embedding provider backed by an HTTP inference endpoint
pub struct EndpointEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    model_name: String,
    dimension: usize,
    max_depth: usize,
    parameters: BTreeMap<String, Value>,
}

impl EndpointEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let url = config
            .endpoint_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                EmbeddingError::InitializationError(
                    "embedding.endpoint_url is required in online mode".to_string(),
                )
            })?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| EmbeddingError::InitializationError(e.to_string()))?;

        tracing::info!(
            "Using embedding endpoint {} ({}, {}D)",
            url,
            config.model,
            config.dimension
        );

        Ok(Self {
            client,
            url,
            model_name: config.model.clone(),
            dimension: config.dimension,
            max_depth: config.max_nesting_depth,
            parameters: config.parameters.clone(),
        })
    }

    fn build_payload(&self, texts: &[String]) -> Value {
        let mut body = Map::new();
        body.insert(
            "text_inputs".to_string(),
            Value::Array(texts.iter().cloned().map(Value::String).collect()),
        );
        for (key, value) in &self.parameters {
            body.insert(key.clone(), value.clone());
        }
        Value::Object(body)
    }

    async fn post(&self, payload: &Value) -> Result<Value, EmbeddingError> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| EmbeddingError::Connectivity(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ServiceError(format!(
                "HTTP error {}: {}",
                status, body
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| EmbeddingError::MalformedEmbedding(format!("Invalid JSON response: {}", e)))
    }

    fn checked(&self, vector: EmbeddingVector) -> Result<EmbeddingVector, EmbeddingError> {
        validate_vector(&vector, self.dimension)?;
        Ok(vector)
    }
}

/// Split a batch response into one vector per input text
fn split_batch(
    response: Value,
    expected: usize,
    max_depth: usize,
) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
    if expected == 1 {
        return Ok(vec![normalize_embedding(response, max_depth)?]);
    }

    match extract_payload(response) {
        Value::Array(rows) if rows.len() == expected => rows
            .into_iter()
            .map(|row| normalize_embedding(row, max_depth))
            .collect(),
        Value::Array(rows) => Err(EmbeddingError::MalformedEmbedding(format!(
            "expected {} embeddings, got {}",
            expected,
            rows.len()
        ))),
        _ => Err(EmbeddingError::MalformedEmbedding(
            "batch response is not a sequence".to_string(),
        )),
    }
}

#[async_trait]
impl EmbeddingProvider for EndpointEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        let payload = self.build_payload(&[text.to_string()]);
        let response = self.post(&payload).await?;
        let vector = normalize_embedding(response, self.max_depth)?;
        self.checked(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = self.build_payload(texts);
        let response = self.post(&payload).await?;
        split_batch(response, texts.len(), self.max_depth)?
            .into_iter()
            .map(|v| self.checked(v))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

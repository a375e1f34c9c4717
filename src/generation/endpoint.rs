//! HTTP text-generation endpoint client

use super::{GenerationError, GenerationParams, TextGenerator};
use crate::config::GenerationConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Text generator backed by an HTTP inference endpoint
///
/// Request body: `{"text_inputs": prompt, ..parameters}`.
pub struct EndpointGenerator {
    client: reqwest::Client,
    url: String,
}

impl EndpointGenerator {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, GenerationError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GenerationError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Build from config; `None` when generation is disabled
    pub fn from_config(config: &GenerationConfig) -> Result<Option<Self>, GenerationError> {
        if !config.enabled {
            return Ok(None);
        }

        let url = config
            .endpoint_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::NotConfigured("generation.endpoint_url is not set".to_string())
            })?;

        tracing::info!("Using generation endpoint {}", url);
        let timeout = config.request_timeout_secs.map(Duration::from_secs);
        Self::new(url, timeout).map(Some)
    }
}

/// Extract generated texts from either response shape
///
/// Accepts `{"generated_texts": [..]}`, `[{"generated_text": ..}, ..]` and a
/// bare `{"generated_text": ..}`.
pub fn parse_generated(response: Value) -> Result<Vec<String>, GenerationError> {
    let texts: Vec<String> = match &response {
        Value::Object(map) if map.contains_key("generated_texts") => match &map["generated_texts"] {
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        },
        Value::Object(map) => map
            .get("generated_text")
            .and_then(Value::as_str)
            .map(|s| vec![s.to_string()])
            .unwrap_or_default(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("generated_text").and_then(Value::as_str))
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    if texts.is_empty() {
        return Err(GenerationError::MalformedResponse(format!(
            "no generated text in response: {}",
            truncate_for_log(&response.to_string())
        )));
    }
    Ok(texts)
}

fn truncate_for_log(s: &str) -> String {
    s.chars().take(200).collect()
}

#[async_trait]
impl TextGenerator for EndpointGenerator {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<String>, GenerationError> {
        let body = params.request_body(prompt)?;

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Connectivity(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::ServiceError(format!(
                "HTTP error {}: {}",
                status,
                truncate_for_log(&text)
            )));
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|e| GenerationError::MalformedResponse(format!("Invalid JSON response: {}", e)))?;

        parse_generated(value)
    }
}

//! Answer generation
//!
//! - `GenerationParams` hyperparameters, validated before any request
//! - `TextGenerator` trait with an HTTP endpoint implementation
//! - `AnswerComposer` building a prompt from retrieved documents, with an
//!   extractive fallback when generation is off or fails

mod composer;
mod endpoint;

pub use composer::{Answer, AnswerComposer, PROMPT_TEMPLATE};
pub use endpoint::{parse_generated, EndpointGenerator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation service unreachable: {0}")]
    Connectivity(String),

    #[error("Invalid parameter {name}={value}: {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Generation service error: {0}")]
    ServiceError(String),

    #[error("Malformed generation response: {0}")]
    MalformedResponse(String),

    #[error("Generation not configured: {0}")]
    NotConfigured(String),
}

impl GenerationError {
    fn invalid(name: &str, value: impl ToString, reason: &str) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Parse a boolean flag from `true/yes/1/on` or `false/no/0/off`
pub fn str_to_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Generation hyperparameters sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_length: i64,
    pub num_return_sequences: i64,
    pub top_k: i64,
    pub top_p: f64,
    /// Sampling flag as configured; parsed with [`str_to_bool`]
    pub do_sample: String,
    pub temperature: f64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 500,
            num_return_sequences: 1,
            top_k: 50,
            top_p: 0.95,
            do_sample: "true".to_string(),
            temperature: 0.01,
        }
    }
}

impl GenerationParams {
    /// Check every parameter, returning the first invalid one
    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.max_length <= 0 {
            return Err(GenerationError::invalid(
                "max_length",
                self.max_length,
                "must be a positive integer",
            ));
        }
        if self.num_return_sequences < 1 {
            return Err(GenerationError::invalid(
                "num_return_sequences",
                self.num_return_sequences,
                "must be at least 1",
            ));
        }
        if !(self.temperature.is_finite() && self.temperature > 0.0) {
            return Err(GenerationError::invalid(
                "temperature",
                self.temperature,
                "must be greater than 0",
            ));
        }
        if self.top_k < 0 {
            return Err(GenerationError::invalid(
                "top_k",
                self.top_k,
                "must be a non-negative integer",
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(GenerationError::invalid(
                "top_p",
                self.top_p,
                "must be in (0, 1]",
            ));
        }
        self.sample_flag()?;
        Ok(())
    }

    fn sample_flag(&self) -> Result<bool, GenerationError> {
        str_to_bool(&self.do_sample).ok_or_else(|| {
            GenerationError::invalid(
                "do_sample",
                &self.do_sample,
                "expected true/yes/1/on or false/no/0/off",
            )
        })
    }

    /// Set one parameter from its string form
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), GenerationError> {
        let int = |v: &str| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| GenerationError::invalid(name, v, "expected an integer"))
        };
        let float = |v: &str| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| GenerationError::invalid(name, v, "expected a number"))
        };

        match name {
            "max_length" => self.max_length = int(value)?,
            "num_return_sequences" => self.num_return_sequences = int(value)?,
            "top_k" => self.top_k = int(value)?,
            "top_p" => self.top_p = float(value)?,
            "temperature" => self.temperature = float(value)?,
            "do_sample" => self.do_sample = value.trim().to_string(),
            _ => return Err(GenerationError::invalid(name, value, "unknown parameter")),
        }
        Ok(())
    }

    /// Validated request body for `prompt`
    pub fn request_body(&self, prompt: &str) -> Result<Value, GenerationError> {
        self.validate()?;
        Ok(json!({
            "text_inputs": prompt,
            "max_length": self.max_length,
            "num_return_sequences": self.num_return_sequences,
            "top_k": self.top_k,
            "top_p": self.top_p,
            "do_sample": self.sample_flag()?,
            "temperature": self.temperature,
        }))
    }
}

/// Text generation service
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate completions for `prompt`
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Vec<String>, GenerationError>;
}

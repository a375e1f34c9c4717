use crate::config::Config;
use crate::error::{MarqueeError, Result, ValidationError};

const BACKENDS: [&str; 2] = ["local", "atlas"];
const EMBEDDING_MODES: [&str; 2] = ["offline", "online"];

/// Configuration validator
///
/// Presence and vocabulary checks only. Generation hyperparameter ranges are
/// checked by the answer composer on every call.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_store(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_generation(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MarqueeError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != "1.0.0" {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_store(config: &Config, errors: &mut Vec<ValidationError>) {
        let store = &config.store;

        if !BACKENDS.contains(&store.backend.as_str()) {
            errors.push(ValidationError::new(
                "store.backend",
                format!("Backend must be one of {:?}, got '{}'", BACKENDS, store.backend),
            ));
        }

        let required = [
            ("store.text_field", &store.text_field),
            ("store.title_field", &store.title_field),
            ("store.vector_field", &store.vector_field),
        ];
        for (path, value) in required {
            if value.is_empty() {
                errors.push(ValidationError::new(path, "Field name cannot be empty"));
            }
        }

        if store.search_fields.is_empty() {
            errors.push(ValidationError::new(
                "store.search_fields",
                "At least one keyword search field is required",
            ));
        }

        match store.backend.as_str() {
            "local" => {
                if store.data_dir.as_os_str().is_empty() {
                    errors.push(ValidationError::new(
                        "store.data_dir",
                        "Data directory cannot be empty",
                    ));
                }
            }
            "atlas" => {
                if !cfg!(feature = "atlas") {
                    errors.push(ValidationError::new(
                        "store.backend",
                        "Binary was built without the 'atlas' feature",
                    ));
                }

                if store.connection_uri().is_err() {
                    errors.push(ValidationError::new(
                        "store.uri",
                        format!(
                            "Connection string must be set in store.uri or ${}",
                            store.uri_env
                        ),
                    ));
                }

                let required = [
                    ("store.database", &store.database),
                    ("store.collection", &store.collection),
                    ("store.text_index", &store.text_index),
                    ("store.vector_index", &store.vector_index),
                ];
                for (path, value) in required {
                    if value.is_empty() {
                        errors.push(ValidationError::new(path, "Setting cannot be empty"));
                    }
                }
            }
            _ => {}
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let embedding = &config.embedding;

        if !EMBEDDING_MODES.contains(&embedding.mode.as_str()) {
            errors.push(ValidationError::new(
                "embedding.mode",
                format!("Mode must be 'offline' or 'online', got '{}'", embedding.mode),
            ));
        }

        if embedding.mode == "online" && is_blank(&embedding.endpoint_url) {
            errors.push(ValidationError::new(
                "embedding.endpoint_url",
                "Endpoint URL is required in online mode",
            ));
        }

        if embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Vector dimension must be greater than 0",
            ));
        }

        if embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if embedding.max_nesting_depth == 0 {
            errors.push(ValidationError::new(
                "embedding.max_nesting_depth",
                "Nesting depth guard must be greater than 0",
            ));
        }
    }

    fn validate_generation(config: &Config, errors: &mut Vec<ValidationError>) {
        let generation = &config.generation;

        if generation.enabled && is_blank(&generation.endpoint_url) {
            errors.push(ValidationError::new(
                "generation.endpoint_url",
                "Endpoint URL is required when generation is enabled",
            ));
        }

        if generation.max_context_chars == 0 {
            errors.push(ValidationError::new(
                "generation.max_context_chars",
                "Context budget must be greater than 0",
            ));
        }

        if generation.fallback_chars == 0 {
            errors.push(ValidationError::new(
                "generation.fallback_chars",
                "Fallback length must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.limit == 0 {
            errors.push(ValidationError::new(
                "retrieval.limit",
                "Limit must be greater than 0",
            ));
        }

        if retrieval.candidate_pool_size < retrieval.limit {
            errors.push(ValidationError::new(
                "retrieval.candidate_pool_size",
                format!(
                    "Candidate pool ({}) must be at least the limit ({})",
                    retrieval.candidate_pool_size, retrieval.limit
                ),
            ));
        }
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_backend() {
        let mut config = Config::default();
        config.store.backend = "postgres".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_online_mode_requires_endpoint() {
        let mut config = Config::default();
        config.embedding.mode = "online".to_string();
        assert!(ConfigValidator::validate(&config).is_err());

        config.embedding.endpoint_url = Some("http://localhost:8080/embed".to_string());
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_atlas_requires_connection_string() {
        let mut config = Config::default();
        config.store.backend = "atlas".to_string();
        config.store.uri_env = "MARQUEE_TEST_UNSET_ATLAS_URI".to_string();

        match ConfigValidator::validate(&config) {
            Err(MarqueeError::ConfigValidation { errors }) => {
                assert!(errors.iter().any(|e| e.path == "store.uri"));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_candidate_pool_below_limit() {
        let mut config = Config::default();
        config.retrieval.limit = 10;
        config.retrieval.candidate_pool_size = 5;
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_generation_parameters_not_range_checked() {
        let mut config = Config::default();
        config.generation.parameters.top_p = 1.5;
        assert!(ConfigValidator::validate(&config).is_ok());
    }
}

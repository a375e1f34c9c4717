//! Configuration management for Marquee
//!
//! Settings are loaded from a TOML file, overridden from `MARQUEE_*`
//! environment variables, then validated. Every component receives the
//! section it needs through its constructor.

use crate::error::{MarqueeError, Result};
use crate::generation::GenerationParams;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "local" (embedded SQLite + tantivy + HNSW) or "atlas"
    pub backend: String,
    /// Root directory of the embedded store
    pub data_dir: PathBuf,
    /// Connection string; when absent it is read from `uri_env`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Environment variable holding the connection string
    pub uri_env: String,
    pub database: String,
    pub collection: String,
    /// Full-text search index name
    pub text_index: String,
    /// Vector search index name
    pub vector_index: String,
    /// Primary content field
    pub text_field: String,
    pub title_field: String,
    /// Field holding the precomputed embedding
    pub vector_field: String,
    /// Fields covered by keyword search
    pub search_fields: Vec<String>,
    /// Fields retried by substring search when the text field has no match
    pub fallback_fields: Vec<String>,
}

impl StoreConfig {
    /// Resolve the store connection string
    pub fn connection_uri(&self) -> Result<String> {
        if let Some(uri) = self.uri.as_ref().filter(|u| !u.is_empty()) {
            return Ok(uri.clone());
        }

        match std::env::var(&self.uri_env) {
            Ok(uri) if !uri.is_empty() => Ok(uri),
            _ => Err(MarqueeError::Config(format!(
                "Store connection string not set (store.uri or ${})",
                self.uri_env
            ))),
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "offline" (local fastembed model) or "online" (HTTP endpoint)
    pub mode: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    /// Expected vector dimension
    pub dimension: usize,
    pub batch_size: usize,
    /// Maximum singleton layers unwrapped from an endpoint response
    pub max_nesting_depth: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Extra fields merged into every endpoint request body
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

/// Text generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Characters of concatenated document text placed in the prompt
    pub max_context_chars: usize,
    /// Characters of context kept by the extractive fallback
    pub fallback_chars: usize,
    pub parameters: GenerationParams,
}

/// Retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Documents returned per query
    pub limit: usize,
    /// ANN candidate pool (recall/speed trade-off)
    pub candidate_pool_size: usize,
}

/// Conversational adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Intent reported when the inbound event carries none
    pub default_intent: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            default_intent: "FallbackIntent".to_string(),
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_enabled: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MarqueeError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MarqueeError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MarqueeError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MarqueeError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| MarqueeError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(backend) = overrides.store_backend {
            self.store.backend = backend;
        }
        if let Some(mode) = overrides.embedding_mode {
            self.embedding.mode = mode;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(enabled) = overrides.generation_enabled {
            self.generation.enabled = enabled;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MARQUEE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("MARQUEE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORE__BACKEND" => self.store.backend = value.to_string(),
            "STORE__DATA_DIR" => self.store.data_dir = PathBuf::from(value),
            "STORE__URI" => self.store.uri = Some(value.to_string()),
            "STORE__DATABASE" => self.store.database = value.to_string(),
            "STORE__COLLECTION" => self.store.collection = value.to_string(),
            "STORE__TEXT_INDEX" => self.store.text_index = value.to_string(),
            "STORE__VECTOR_INDEX" => self.store.vector_index = value.to_string(),
            "STORE__TEXT_FIELD" => self.store.text_field = value.to_string(),
            "STORE__VECTOR_FIELD" => self.store.vector_field = value.to_string(),
            "EMBEDDING__MODE" => self.embedding.mode = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__ENDPOINT_URL" => self.embedding.endpoint_url = Some(value.to_string()),
            "GENERATION__ENABLED" => {
                self.generation.enabled = parse_env(path, value)?;
            }
            "GENERATION__ENDPOINT_URL" => {
                self.generation.endpoint_url = Some(value.to_string());
            }
            "RETRIEVAL__LIMIT" => self.retrieval.limit = parse_env(path, value)?,
            "RETRIEVAL__CANDIDATE_POOL_SIZE" => {
                self.retrieval.candidate_pool_size = parse_env(path, value)?;
            }
            _ => {
                if let Some(name) = path.strip_prefix("GENERATION__PARAMETERS__") {
                    self.generation
                        .parameters
                        .set(&name.to_ascii_lowercase(), value)
                        .map_err(|e| MarqueeError::InvalidConfigValue {
                            path: path.to_string(),
                            message: e.to_string(),
                        })?;
                } else {
                    tracing::debug!("Unknown env config key: {}", path);
                }
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| MarqueeError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("marquee").join("config.toml"))
    }

    /// Embedded store directory with a leading `~/` expanded
    pub fn data_dir(&self) -> Result<PathBuf> {
        expand_home(&self.store.data_dir)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| MarqueeError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| MarqueeError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| MarqueeError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            store: StoreConfig {
                backend: "local".to_string(),
                data_dir: PathBuf::from("~/.marquee"),
                uri: None,
                uri_env: "ATLAS_URI".to_string(),
                database: "sample_mflix".to_string(),
                collection: "movies".to_string(),
                text_index: "default".to_string(),
                vector_index: "vector-index".to_string(),
                text_field: "fullplot".to_string(),
                title_field: "title".to_string(),
                vector_field: "egVector".to_string(),
                search_fields: vec![
                    "fullplot".to_string(),
                    "genres".to_string(),
                    "title".to_string(),
                    "cast".to_string(),
                ],
                fallback_fields: vec![
                    "title".to_string(),
                    "genres".to_string(),
                    "plot".to_string(),
                ],
            },
            embedding: EmbeddingConfig {
                mode: "offline".to_string(),
                model: "all-MiniLM-L6-v2".to_string(),
                endpoint_url: None,
                dimension: 384,
                batch_size: 32,
                max_nesting_depth: 5,
                request_timeout_secs: None,
                parameters: BTreeMap::new(),
            },
            generation: GenerationConfig {
                enabled: false,
                endpoint_url: None,
                request_timeout_secs: None,
                max_context_chars: 2000,
                fallback_chars: 500,
                parameters: GenerationParams::default(),
            },
            retrieval: RetrievalConfig {
                limit: 3,
                candidate_pool_size: 150,
            },
            conversation: ConversationConfig::default(),
            profiles: HashMap::new(),
        }
    }
}

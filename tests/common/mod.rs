//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use marquee::config::Config;
use marquee::embedding::{EmbeddingError, EmbeddingProvider, EmbeddingVector};
use marquee::generation::TextGenerator;
use marquee::store::{LocalStore, StoreBackend};
use marquee::Pipeline;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const DIM: usize = 16;

/// Bag-of-words hashing embedder; texts sharing words land close together
pub struct HashingEmbedder {
    pub calls: AtomicUsize,
}

impl HashingEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    fn vector(text: &str) -> EmbeddingVector {
        let mut v = vec![0.0f32; DIM];
        v[0] = 0.01;
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if word.is_empty() {
                continue;
            }
            let bucket = blake3::hash(word.as_bytes()).as_bytes()[0] as usize % DIM;
            v[bucket] += 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "hashing"
    }
}

/// Generator that records calls and answers with a fixed text
pub struct CannedGenerator {
    pub calls: AtomicUsize,
    pub reply: String,
}

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _params: &marquee::generation::GenerationParams,
    ) -> Result<Vec<String>, marquee::generation::GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![self.reply.clone()])
    }
}

pub fn movies() -> Vec<Value> {
    vec![
        json!({
            "_id": {"$oid": "573a1390f29313caabcd42e8"},
            "title": "Robin Hood",
            "year": 1922,
            "genres": ["Action", "Adventure", "Family"],
            "cast": ["Douglas Fairbanks", "Wallace Beery", "Sam De Grasse"],
            "plot": "Robin Hood fights the tyranny of Prince John.",
            "fullplot": "The Earl of Huntingdon returns from the Crusades and, as the outlaw Robin Hood, robs from the rich to give to the poor of Sherwood Forest."
        }),
        json!({
            "_id": {"$oid": "573a1391f29313caabcd6f98"},
            "title": "The General",
            "year": 1926,
            "genres": ["Action", "Adventure", "Comedy"],
            "cast": ["Buster Keaton", "Marion Mack"],
            "plot": "A train engineer pursues stolen locomotive.",
            "fullplot": "When Union spies steal an engineer's beloved locomotive, he pursues it single-handedly and straight through enemy lines."
        }),
        json!({
            "_id": {"$oid": "573a1390f29313caabcd4803"},
            "title": "Gertie the Dinosaur",
            "year": 1914,
            "genres": ["Animation", "Short", "Comedy"],
            "cast": ["Winsor McCay"],
            "plot": "The cartoonist Winsor McCay brings the Dinosaurus back to life.",
            "fullplot": "Winsor McCay bets his friends that he can bring a dinosaur to life by drawing."
        }),
        json!({
            "_id": {"$oid": "573a1392f29313caabcd9ca6"},
            "title": "Metropolis",
            "year": 1927,
            "genres": ["Drama", "Sci-Fi"],
            "cast": ["Alfred Abel", "Brigitte Helm"],
            "plot": "In a futuristic city sharply divided between workers and planners.",
            "fullplot": "In a futuristic city divided between the working class and the planners, the son of the city's mastermind falls in love with a prophet who predicts the coming of a savior."
        }),
    ]
}

pub fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.store.data_dir = temp.path().join("store");
    config.embedding.dimension = DIM;
    config
}

/// Local store loaded with [`movies`]
pub async fn local_store(config: &Config) -> Arc<LocalStore> {
    let store = LocalStore::open(&config.data_dir().unwrap(), &config.store, DIM).unwrap();
    store.ingest(movies()).await.unwrap();
    Arc::new(store)
}

/// Pipeline over a populated local store with every vector backfilled
pub async fn pipeline(
    config: Config,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn TextGenerator>>,
) -> Pipeline {
    let store = local_store(&config).await;
    let pipeline = Pipeline::from_parts(StoreBackend::Local(store), embedder.clone(), generator, config);
    if embedder.is_some() {
        pipeline.backfill(None).await.unwrap();
    }
    pipeline
}

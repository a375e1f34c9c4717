//! End-to-end retrieval over the embedded store

mod common;

use common::{pipeline, test_config, HashingEmbedder};
use marquee::config::Config;
use marquee::embedding::{EmbeddingProvider, EndpointEmbeddingProvider};
use marquee::retrieval::{SearchTier, TierStatus};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

fn unreachable_embedder(config: &Config) -> Arc<dyn EmbeddingProvider> {
    let mut embedding = config.embedding.clone();
    embedding.mode = "online".to_string();
    // Port 1 is never bound in test environments
    embedding.endpoint_url = Some("http://127.0.0.1:1/embed".to_string());
    Arc::new(EndpointEmbeddingProvider::new(&embedding).unwrap())
}

#[tokio::test]
async fn test_title_query_resolves_by_keyword() {
    let temp = TempDir::new().unwrap();
    let embedder = HashingEmbedder::new();
    let pipeline = pipeline(
        test_config(&temp),
        Some(embedder.clone() as Arc<dyn EmbeddingProvider>),
        None,
    )
    .await;

    let calls_before = embedder.calls.load(Ordering::SeqCst);
    let trace = pipeline.query("Robin Hood", None).await;

    assert_eq!(trace.tier, SearchTier::Keyword);
    assert!(!trace.documents.is_empty());
    assert!(trace.documents[0].title.contains("Robin Hood"));
    assert_eq!(trace.documents[0].year, Some(1922));
    assert!(trace
        .documents
        .iter()
        .all(|d| d.source_tier == SearchTier::Keyword));
    assert_eq!(trace.attempts.len(), 1);
    // Keyword hit never embeds the query
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test]
async fn test_unknown_words_fall_to_semantic() {
    let temp = TempDir::new().unwrap();
    let pipeline = pipeline(
        test_config(&temp),
        Some(HashingEmbedder::new() as Arc<dyn EmbeddingProvider>),
        None,
    )
    .await;

    let trace = pipeline.query("xylophone zebra quantum", None).await;

    assert_eq!(trace.attempts[0].tier, SearchTier::Keyword);
    assert_eq!(trace.attempts[0].status, TierStatus::Empty);
    assert_eq!(trace.tier, SearchTier::Semantic);
    assert!(!trace.documents.is_empty());
    assert!(trace.documents.len() <= 3);
    for pair in trace.documents.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

#[tokio::test]
async fn test_unreachable_embedding_falls_to_simple() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let embedder = unreachable_embedder(&config);
    let pipeline = pipeline(config, Some(embedder), None).await;

    let trace = pipeline.query("xylophone zebra quantum", None).await;

    assert_eq!(trace.tier, SearchTier::Simple);
    assert!(matches!(
        trace.attempts[1].status,
        TierStatus::Failed { .. }
    ));
    // No substring match: the store hands back an arbitrary sample
    assert_eq!(trace.documents.len(), 3);
    assert!(trace.documents.iter().all(|d| d.score == 0.0));
}

#[tokio::test]
async fn test_simple_tier_matches_substrings() {
    let temp = TempDir::new().unwrap();
    let pipeline = pipeline(test_config(&temp), None, None).await;

    // Prefixes the keyword index does not match as whole tokens
    let trace = pipeline.query("locomot", Some(2)).await;

    assert_eq!(trace.tier, SearchTier::Simple);
    assert_eq!(trace.documents.len(), 1);
    assert_eq!(trace.documents[0].title, "The General");
    assert_eq!(trace.documents[0].score, 1.0);
}

#[tokio::test]
async fn test_backfill_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let pipeline = pipeline(
        test_config(&temp),
        Some(HashingEmbedder::new() as Arc<dyn EmbeddingProvider>),
        None,
    )
    .await;

    let stats = pipeline.store().local().unwrap().stats().await.unwrap();
    assert_eq!(stats.movies, 4);
    assert_eq!(stats.vectors, 4);

    let again = pipeline.backfill(None).await.unwrap();
    assert_eq!(again.pending, 0);
    assert_eq!(again.processed, 0);
}

#[tokio::test]
async fn test_ingest_json_lines_file() {
    let temp = TempDir::new().unwrap();
    let config = test_config(&temp);
    let store =
        marquee::store::LocalStore::open(&config.data_dir().unwrap(), &config.store, common::DIM)
            .unwrap();

    let file = temp.path().join("movies.jsonl");
    let lines: Vec<String> = common::movies().iter().map(|m| m.to_string()).collect();
    std::fs::write(&file, lines.join("\n")).unwrap();

    let stats = store.ingest_file(&file).await.unwrap();
    assert_eq!(stats.inserted, 4);

    let again = store.ingest_file(&file).await.unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.skipped, 4);
}

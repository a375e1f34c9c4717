//! Embedded document store
//!
//! Movie records live in SQLite, keyword search runs on a tantivy index in
//! `<data_dir>/keyword`, and vectors are served from an in-memory HNSW
//! index rebuilt from SQLite at open.

mod database;
mod keyword_index;
mod vector_index;

pub use database::{Database, DbStats, MovieRow, NewMovie};
pub use keyword_index::{KeywordEntry, KeywordHit, KeywordIndex};
pub use vector_index::{VectorHit, VectorIndex};

use super::{
    check_candidate_pool, normalize_terms, term_pattern, term_score, DocumentStore, MovieMatch,
    PendingDocument, StoreError, VectorBackfill,
};
use crate::config::StoreConfig;
use crate::embedding::{normalize_embedding, validate_vector, DEFAULT_MAX_DEPTH};
use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

type Result<T> = std::result::Result<T, StoreError>;

const DB_FILE: &str = "marquee.db";
const KEYWORD_DIR: &str = "keyword";

/// Outcome of one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestStats {
    /// New movies written
    pub inserted: usize,
    /// Records whose id was already stored
    pub skipped: usize,
    /// Precomputed vectors accepted from the records
    pub vectors: usize,
    /// Precomputed vectors rejected (wrong shape or dimension)
    pub invalid_vectors: usize,
}

/// Store size summary
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub movies: usize,
    pub vectors: usize,
    pub keyword_documents: u64,
    pub data_dir: PathBuf,
}

/// SQLite + tantivy + HNSW implementation of the store contract
pub struct LocalStore {
    database: Database,
    keyword: RwLock<KeywordIndex>,
    vectors: VectorIndex,
    dimension: usize,
    text_field: String,
    title_field: String,
    vector_field: String,
    fallback_columns: Vec<&'static str>,
    data_dir: PathBuf,
}

impl LocalStore {
    /// Open (or create) the store under `data_dir`
    pub fn open(data_dir: &Path, config: &StoreConfig, dimension: usize) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;

        let database = Database::new(&data_dir.join(DB_FILE))?;
        let mut keyword = KeywordIndex::new(data_dir.join(KEYWORD_DIR))?;
        reconcile_keyword_index(&database, &mut keyword)?;

        let stored = database.all_vectors()?;
        let vectors = VectorIndex::build(dimension, &stored)?;

        let fallback_columns = config
            .fallback_fields
            .iter()
            .filter_map(|field| {
                let column = column_for_field(field, config);
                if column.is_none() {
                    tracing::warn!("Fallback field '{}' is not stored locally, ignoring", field);
                }
                column
            })
            .collect();

        tracing::info!(
            "Opened local store at {} ({} vectors of {}D, {} keyword documents)",
            data_dir.display(),
            vectors.len(),
            dimension,
            keyword.len()
        );

        Ok(Self {
            database,
            keyword: RwLock::new(keyword),
            vectors,
            dimension,
            text_field: config.text_field.clone(),
            title_field: config.title_field.clone(),
            vector_field: config.vector_field.clone(),
            fallback_columns,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Ingest movie records in the mflix document shape
    ///
    /// Records whose id is already stored are skipped, but re-indexed when
    /// the keyword index lost them. A numeric sequence under the configured
    /// vector field is stored as the movie's vector.
    pub async fn ingest(&self, records: Vec<Value>) -> Result<IngestStats> {
        let mut stats = IngestStats::default();
        let mut keyword = self.keyword.write().await;
        let mut indexed = HashSet::new();

        for record in records {
            let movie = self.to_movie(&record);
            let Some(id) = self.database.insert_movie(&movie)? else {
                stats.skipped += 1;
                if let Some(id) = self.database.movie_id(&movie.doc_key)? {
                    if !indexed.contains(&id) && !keyword.contains(id)? {
                        tracing::debug!("Re-indexing stored movie {}", movie.doc_key);
                        for row in self.database.get_movies(&[id])? {
                            keyword.insert(row.id, &row.keyword_entry())?;
                        }
                        indexed.insert(id);
                    }
                }
                continue;
            };

            keyword.insert(
                id,
                &KeywordEntry {
                    title: &movie.title,
                    text: &movie.text,
                    genres: &movie.genres,
                    cast: &movie.cast,
                },
            )?;
            indexed.insert(id);
            stats.inserted += 1;

            if let Some(raw) = record.get(self.vector_field.as_str()) {
                let checked = normalize_embedding(raw.clone(), DEFAULT_MAX_DEPTH).and_then(|v| {
                    validate_vector(&v, self.dimension)?;
                    Ok(v)
                });
                match checked {
                    Ok(vector) => {
                        if self.database.insert_vector(id, &vector)? {
                            self.vectors.insert(id, &vector)?;
                            stats.vectors += 1;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Movie {}: ignoring {}: {}", movie.doc_key, self.vector_field, e);
                        stats.invalid_vectors += 1;
                    }
                }
            }
        }

        keyword.commit()?;

        tracing::info!(
            "Ingested {} movies ({} already present, {} vectors)",
            stats.inserted,
            stats.skipped,
            stats.vectors
        );

        Ok(stats)
    }

    /// Ingest a JSON array or JSON-lines file
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestStats> {
        let content = std::fs::read_to_string(path)?;
        let records = parse_records(&content)?;
        self.ingest(records).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let DbStats {
            movie_count,
            vector_count,
        } = self.database.stats()?;

        Ok(StoreStats {
            movies: movie_count,
            vectors: vector_count,
            keyword_documents: self.keyword.read().await.len(),
            data_dir: self.data_dir.clone(),
        })
    }

    fn to_movie(&self, record: &Value) -> NewMovie {
        NewMovie {
            doc_key: document_key(record),
            title: string_field(record, &self.title_field),
            text: string_field(record, &self.text_field),
            plot: string_field(record, "plot"),
            year: record.get("year").and_then(parse_year),
            genres: list_field(record, "genres"),
            cast: list_field(record, "cast"),
        }
    }

    fn substring_pass(
        &self,
        rows: &[MovieRow],
        pattern: &Regex,
        term_count: usize,
        columns: &[&str],
    ) -> Vec<MovieMatch> {
        rows.iter()
            .filter_map(|row| {
                let haystack = columns
                    .iter()
                    .map(|c| row.column(c))
                    .collect::<Vec<_>>()
                    .join("\n");
                let score = term_score(pattern, &haystack, term_count)?;
                Some(row.clone().into_match(score))
            })
            .collect()
    }
}

/// Rebuild the keyword index from SQLite when their document counts differ
///
/// Movie rows are written one by one while keyword documents are committed
/// once per ingest, so an interrupted ingest leaves rows the index lacks.
fn reconcile_keyword_index(database: &Database, keyword: &mut KeywordIndex) -> Result<()> {
    let movies = database.stats()?.movie_count;
    if keyword.len() as usize == movies {
        return Ok(());
    }

    tracing::warn!(
        "Keyword index holds {} documents for {} movies, rebuilding",
        keyword.len(),
        movies
    );
    keyword.clear()?;
    for row in database.all_movies()? {
        keyword.insert(row.id, &row.keyword_entry())?;
    }
    keyword.commit()
}

/// Map a configured field name onto a stored column
fn column_for_field(field: &str, config: &StoreConfig) -> Option<&'static str> {
    if field == config.text_field {
        Some("text")
    } else if field == config.title_field {
        Some("title")
    } else {
        match field {
            "plot" => Some("plot"),
            "genres" => Some("genres"),
            "cast" => Some("cast"),
            _ => None,
        }
    }
}

/// Parse a JSON array or one JSON document per line
pub fn parse_records(content: &str) -> Result<Vec<Value>> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| StoreError::InvalidArgument(format!("Invalid JSON array: {}", e)));
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| {
                StoreError::InvalidArgument(format!("Invalid JSON on line {}: {}", n + 1, e))
            })
        })
        .collect()
}

fn document_key(record: &Value) -> String {
    match record.get("_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Object(map)) => match map.get("$oid") {
            Some(Value::String(oid)) => oid.clone(),
            _ => content_key(record),
        },
        Some(Value::Number(n)) => n.to_string(),
        _ => content_key(record),
    }
}

fn content_key(record: &Value) -> String {
    blake3::hash(record.to_string().as_bytes()).to_hex().to_string()
}

fn string_field(record: &Value, field: &str) -> String {
    record
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn list_field(record: &Value, field: &str) -> Vec<String> {
    match record.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Years arrive as numbers or as strings such as "1995è"
fn parse_year(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<MovieMatch>> {
        let hits = self.keyword.read().await.search(query, limit)?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        let rows = self.database.get_movies(&ids)?;

        let results = rows
            .into_iter()
            .filter_map(|row| {
                let score = hits.iter().find(|h| h.id == row.id)?.score;
                Some(row.into_match(score))
            })
            .collect();

        Ok(results)
    }

    async fn vector_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        candidate_pool_size: usize,
    ) -> Result<Vec<MovieMatch>> {
        check_candidate_pool(limit, candidate_pool_size)?;

        let hits = self
            .vectors
            .search(query_vector, limit, candidate_pool_size)?;
        let ids: Vec<i64> = hits.iter().map(|h| h.id).collect();
        let rows = self.database.get_movies(&ids)?;

        let results = rows
            .into_iter()
            .filter_map(|row| {
                let score = hits.iter().find(|h| h.id == row.id)?.score;
                Some(row.into_match(score))
            })
            .collect();

        Ok(results)
    }

    async fn substring_search(&self, terms: &[String], limit: usize) -> Result<Vec<MovieMatch>> {
        let terms = normalize_terms(terms);

        if !terms.is_empty() {
            let pattern = term_pattern(&terms)?;
            let rows = self.database.all_movies()?;

            let passes: [&[&str]; 2] = [&["text"], self.fallback_columns.as_slice()];
            for columns in passes {
                if columns.is_empty() {
                    continue;
                }
                let mut matches = self.substring_pass(&rows, &pattern, terms.len(), columns);
                if !matches.is_empty() {
                    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
                    matches.truncate(limit);
                    return Ok(matches);
                }
            }
        }

        tracing::debug!("No substring match, returning an arbitrary sample");
        Ok(self
            .database
            .sample_movies(limit)?
            .into_iter()
            .map(|row| row.into_match(0.0))
            .collect())
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[async_trait]
impl VectorBackfill for LocalStore {
    async fn pending_vectors(&self) -> Result<Vec<PendingDocument>> {
        Ok(self
            .database
            .movies_without_vectors()?
            .into_iter()
            .map(|(_, id, text)| PendingDocument { id, text })
            .collect())
    }

    async fn store_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        validate_vector(vector, self.dimension)
            .map_err(|e| StoreError::InvalidArgument(e.to_string()))?;

        let movie_id = self
            .database
            .movie_id(id)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if self.database.insert_vector(movie_id, vector)? {
            self.vectors.insert(movie_id, vector)?;
        }
        Ok(())
    }
}

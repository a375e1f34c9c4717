//! MongoDB Atlas document store
//!
//! Keyword search runs through an Atlas Search `$search` stage, vector
//! search through `$vectorSearch`, and substring search through `$regex`
//! filters with a `$sample` stage as the last resort.

use super::{
    check_candidate_pool, normalize_terms, term_pattern, term_score, DocumentStore, MovieMatch,
    PendingDocument, StoreError, VectorBackfill,
};
use crate::config::StoreConfig;
use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::options::FindOptions;
use mongodb::{Client, Collection, Cursor};
use regex::Regex;

type Result<T> = std::result::Result<T, StoreError>;

/// Field names used by the queries
#[derive(Debug, Clone)]
struct Fields {
    text: String,
    title: String,
    vector: String,
    search: Vec<String>,
    fallback: Vec<String>,
}

/// Atlas-backed implementation of the store contract
pub struct AtlasStore {
    collection: Collection<Document>,
    text_index: String,
    vector_index: String,
    fields: Fields,
}

fn query_err(e: mongodb::error::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

impl AtlasStore {
    /// Connect and ping the cluster
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let uri = config
            .connection_uri()
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;

        let client = Client::with_uri_str(&uri)
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;

        let database = client.database(&config.database);
        database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;

        tracing::info!(
            "Connected to Atlas collection {}.{}",
            config.database,
            config.collection
        );

        Ok(Self {
            collection: database.collection::<Document>(&config.collection),
            text_index: config.text_index.clone(),
            vector_index: config.vector_index.clone(),
            fields: Fields {
                text: config.text_field.clone(),
                title: config.title_field.clone(),
                vector: config.vector_field.clone(),
                search: config.search_fields.clone(),
                fallback: config.fallback_fields.clone(),
            },
        })
    }

    async fn collect(&self, mut cursor: Cursor<Document>) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        while cursor.advance().await.map_err(query_err)? {
            documents.push(cursor.deserialize_current().map_err(query_err)?);
        }
        Ok(documents)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<MovieMatch>> {
        let cursor = self
            .collection
            .aggregate(pipeline, None)
            .await
            .map_err(query_err)?;
        let documents = self.collect(cursor).await?;
        Ok(documents
            .iter()
            .map(|d| to_match(d, &self.fields, score_of(d)))
            .collect())
    }

    async fn regex_pass(
        &self,
        fields: &[String],
        terms: &[String],
        pattern: &Regex,
        limit: usize,
    ) -> Result<Vec<MovieMatch>> {
        let filter = regex_filter(fields, pattern.as_str());
        let options = FindOptions::builder()
            .limit(limit as i64)
            .projection(regex_projection(&self.fields, fields))
            .build();

        let cursor = self
            .collection
            .find(filter, options)
            .await
            .map_err(query_err)?;

        let mut matches: Vec<MovieMatch> = self
            .collect(cursor)
            .await?
            .iter()
            .map(|d| {
                let haystack = fields
                    .iter()
                    .map(|f| field_text(d, f))
                    .collect::<Vec<_>>()
                    .join("\n");
                let score = term_score(pattern, &haystack, terms.len()).unwrap_or(0.0);
                to_match(d, &self.fields, score)
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(matches)
    }
}

/// Projection onto the retrieval fields, with an optional `$meta` score
fn projection(fields: &Fields, score_meta: Option<&str>) -> Document {
    let mut projection = doc! {
        "_id": 1,
        fields.text.as_str(): 1,
        fields.title.as_str(): 1,
        "year": 1,
        "genres": 1,
        "cast": 1,
    };
    if let Some(meta) = score_meta {
        projection.insert("score", doc! { "$meta": meta });
    }
    projection
}

/// Result projection that also carries every field a regex pass scores
fn regex_projection(fields: &Fields, pass_fields: &[String]) -> Document {
    let mut projection = projection(fields, None);
    for field in pass_fields {
        projection.insert(field.as_str(), 1);
    }
    projection
}

fn text_search_pipeline(fields: &Fields, index: &str, query: &str, limit: usize) -> Vec<Document> {
    vec![
        doc! {
            "$search": {
                "index": index,
                "text": {
                    "query": query,
                    "path": fields.search.clone(),
                },
            },
        },
        doc! { "$limit": limit as i64 },
        doc! { "$project": projection(fields, Some("searchScore")) },
    ]
}

fn vector_search_pipeline(
    fields: &Fields,
    index: &str,
    query_vector: &[f32],
    limit: usize,
    candidate_pool_size: usize,
) -> Vec<Document> {
    let query_vector: Vec<f64> = query_vector.iter().map(|x| *x as f64).collect();
    vec![
        doc! {
            "$vectorSearch": {
                "index": index,
                "path": fields.vector.as_str(),
                "queryVector": query_vector,
                "numCandidates": candidate_pool_size as i64,
                "limit": limit as i64,
            },
        },
        doc! { "$project": projection(fields, Some("vectorSearchScore")) },
    ]
}

fn sample_pipeline(fields: &Fields, limit: usize) -> Vec<Document> {
    vec![
        doc! { "$sample": { "size": limit as i64 } },
        doc! { "$project": projection(fields, None) },
    ]
}

fn regex_filter(fields: &[String], pattern: &str) -> Document {
    let clauses: Vec<Document> = fields
        .iter()
        .map(|f| doc! { f.as_str(): { "$regex": pattern, "$options": "i" } })
        .collect();
    doc! { "$or": clauses }
}

fn score_of(document: &Document) -> f32 {
    match document.get("score") {
        Some(Bson::Double(s)) => *s as f32,
        Some(Bson::Int32(s)) => *s as f32,
        Some(Bson::Int64(s)) => *s as f32,
        _ => 0.0,
    }
}

fn id_of(document: &Document) -> String {
    match document.get("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Field rendered as text (arrays joined by spaces)
fn field_text(document: &Document, field: &str) -> String {
    match document.get(field) {
        Some(Bson::String(s)) => s.clone(),
        Some(Bson::Array(items)) => strings(items).join(" "),
        _ => String::new(),
    }
}

fn strings(items: &[Bson]) -> Vec<String> {
    items
        .iter()
        .filter_map(|b| b.as_str().map(str::to_string))
        .collect()
}

fn year_of(document: &Document) -> Option<i32> {
    match document.get("year") {
        Some(Bson::Int32(y)) => Some(*y),
        Some(Bson::Int64(y)) => i32::try_from(*y).ok(),
        Some(Bson::Double(y)) => Some(*y as i32),
        Some(Bson::String(s)) => s
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .ok(),
        _ => None,
    }
}

fn to_match(document: &Document, fields: &Fields, score: f32) -> MovieMatch {
    let list = |name: &str| match document.get(name) {
        Some(Bson::Array(items)) => strings(items),
        Some(Bson::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    };

    MovieMatch {
        id: id_of(document),
        text: field_text(document, &fields.text),
        title: field_text(document, &fields.title),
        year: year_of(document),
        genres: list("genres"),
        cast: list("cast"),
        score,
    }
}

fn id_filter(id: &str) -> Document {
    match ObjectId::parse_str(id) {
        Ok(oid) => doc! { "_id": oid },
        Err(_) => doc! { "_id": id },
    }
}

#[async_trait]
impl DocumentStore for AtlasStore {
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<MovieMatch>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let pipeline = text_search_pipeline(&self.fields, &self.text_index, query, limit);
        self.aggregate(pipeline).await
    }

    async fn vector_search(
        &self,
        query_vector: &[f32],
        limit: usize,
        candidate_pool_size: usize,
    ) -> Result<Vec<MovieMatch>> {
        check_candidate_pool(limit, candidate_pool_size)?;
        let pipeline = vector_search_pipeline(
            &self.fields,
            &self.vector_index,
            query_vector,
            limit,
            candidate_pool_size,
        );
        self.aggregate(pipeline).await
    }

    async fn substring_search(&self, terms: &[String], limit: usize) -> Result<Vec<MovieMatch>> {
        let terms = normalize_terms(terms);

        if !terms.is_empty() {
            let pattern = term_pattern(&terms)?;
            let text_fields = vec![self.fields.text.clone()];

            for fields in [&text_fields, &self.fields.fallback] {
                if fields.is_empty() {
                    continue;
                }
                let mut matches = self.regex_pass(fields, &terms, &pattern, limit).await?;
                if !matches.is_empty() {
                    matches.truncate(limit);
                    return Ok(matches);
                }
            }
        }

        tracing::debug!("No substring match, returning an arbitrary sample");
        let mut sample = self.aggregate(sample_pipeline(&self.fields, limit)).await?;
        for movie in &mut sample {
            movie.score = 0.0;
        }
        Ok(sample)
    }

    fn name(&self) -> &str {
        "atlas"
    }
}

#[async_trait]
impl VectorBackfill for AtlasStore {
    async fn pending_vectors(&self) -> Result<Vec<PendingDocument>> {
        let filter = doc! {
            self.fields.vector.as_str(): { "$exists": false },
            self.fields.text.as_str(): { "$exists": true, "$ne": "" },
        };
        let options = FindOptions::builder()
            .projection(doc! { "_id": 1, self.fields.text.as_str(): 1 })
            .build();

        let cursor = self
            .collection
            .find(filter, options)
            .await
            .map_err(query_err)?;

        Ok(self
            .collect(cursor)
            .await?
            .iter()
            .map(|d| PendingDocument {
                id: id_of(d),
                text: field_text(d, &self.fields.text),
            })
            .collect())
    }

    async fn store_vector(&self, id: &str, vector: &[f32]) -> Result<()> {
        let values: Vec<f64> = vector.iter().map(|x| *x as f64).collect();
        let result = self
            .collection
            .update_one(
                id_filter(id),
                doc! { "$set": { self.fields.vector.as_str(): values } },
                None,
            )
            .await
            .map_err(query_err)?;

        if result.matched_count == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

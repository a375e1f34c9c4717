/// Tantivy keyword index over movie fields
use crate::store::StoreError;
use std::path::PathBuf;
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, Term};

/// Boost applied to title matches relative to the other fields
const TITLE_BOOST: f32 = 2.0;

/// Search hit with the movie row id and BM25 score
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub id: i64,
    pub score: f32,
}

/// Fields fed into the index for one movie
#[derive(Debug, Clone, Default)]
pub struct KeywordEntry<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub genres: &'a [String],
    pub cast: &'a [String],
}

/// Tantivy keyword index wrapper
///
/// Provides BM25 search over title, text, genres and cast.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    id_field: Field,
    title_field: Field,
    text_field: Field,
    genres_field: Field,
    cast_field: Field,
}

fn index_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Index(e.to_string())
}

impl KeywordIndex {
    /// Open the index at `index_path`, creating it when missing
    pub fn new(index_path: PathBuf) -> Result<Self, StoreError> {
        let index = if index_path.join("meta.json").exists() {
            Index::open_in_dir(&index_path).map_err(index_err)?
        } else {
            std::fs::create_dir_all(&index_path)?;
            Index::create_in_dir(&index_path, Self::schema()).map_err(index_err)?
        };

        let schema = index.schema();
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| StoreError::Index(format!("Missing '{}' field in schema", name)))
        };
        let id_field = field("id")?;
        let title_field = field("title")?;
        let text_field = field("text")?;
        let genres_field = field("genres")?;
        let cast_field = field("cast")?;

        let writer = index.writer(50_000_000).map_err(index_err)?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(index_err)?;

        Ok(Self {
            index,
            reader,
            writer,
            id_field,
            title_field,
            text_field,
            genres_field,
            cast_field,
        })
    }

    fn schema() -> Schema {
        let mut schema_builder = Schema::builder();
        schema_builder.add_u64_field("id", INDEXED | STORED);
        schema_builder.add_text_field("title", TEXT);
        schema_builder.add_text_field("text", TEXT);
        schema_builder.add_text_field("genres", TEXT);
        schema_builder.add_text_field("cast", TEXT);
        schema_builder.build()
    }

    /// Queue a movie for indexing; visible after [`commit`](Self::commit)
    pub fn insert(&mut self, id: i64, entry: &KeywordEntry<'_>) -> Result<(), StoreError> {
        let doc = doc!(
            self.id_field => id as u64,
            self.title_field => entry.title,
            self.text_field => entry.text,
            self.genres_field => entry.genres.join(" "),
            self.cast_field => entry.cast.join(" "),
        );

        self.writer.add_document(doc).map_err(index_err)?;
        Ok(())
    }

    /// Queue removal of every document; applied on [`commit`](Self::commit)
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.writer.delete_all_documents().map_err(index_err)?;
        Ok(())
    }

    /// Whether a committed document exists for the movie row id
    pub fn contains(&self, id: i64) -> Result<bool, StoreError> {
        let term = Term::from_field_u64(self.id_field, id as u64);
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        let count = self
            .reader
            .searcher()
            .search(&query, &Count)
            .map_err(index_err)?;
        Ok(count > 0)
    }

    /// Commit pending documents and refresh the reader
    pub fn commit(&mut self) -> Result<(), StoreError> {
        self.writer.commit().map_err(index_err)?;
        self.reader.reload().map_err(index_err)?;
        Ok(())
    }

    /// Search all fields, best matches first
    ///
    /// Query syntax errors are tolerated: whatever parses is searched.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<KeywordHit>, StoreError> {
        if query.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let mut query_parser = QueryParser::for_index(
            &self.index,
            vec![
                self.title_field,
                self.text_field,
                self.genres_field,
                self.cast_field,
            ],
        );
        query_parser.set_field_boost(self.title_field, TITLE_BOOST);

        let (parsed, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Ignored {} query syntax errors in {:?}", errors.len(), query);
        }

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(index_err)?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher.doc(doc_address).map_err(index_err)?;
            let id = retrieved
                .get_first(self.id_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| StoreError::Index("Missing or invalid ID field".to_string()))?;
            hits.push(KeywordHit {
                id: id as i64,
                score,
            });
        }

        Ok(hits)
    }

    /// Number of indexed movies
    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry<'a>(title: &'a str, text: &'a str, genres: &'a [String]) -> KeywordEntry<'a> {
        KeywordEntry {
            title,
            text,
            genres,
            cast: &[],
        }
    }

    #[test]
    fn test_search_across_fields() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("keyword")).unwrap();

        let adventure = vec!["Adventure".to_string()];
        let comedy = vec!["Comedy".to_string()];
        index
            .insert(1, &entry("Robin Hood", "An outlaw robs the rich.", &adventure))
            .unwrap();
        index
            .insert(2, &entry("The General", "A train engineer chases spies.", &comedy))
            .unwrap();
        index.commit().unwrap();

        assert_eq!(index.len(), 2);

        let hits = index.search("Robin Hood", 10).unwrap();
        assert_eq!(hits[0].id, 1);

        let hits = index.search("comedy", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);

        assert!(index.search("xylophone", 10).unwrap().is_empty());
    }

    #[test]
    fn test_title_outranks_text() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("keyword")).unwrap();

        index
            .insert(1, &entry("Pirates", "A swashbuckler at sea.", &[]))
            .unwrap();
        index
            .insert(2, &entry("Sea Story", "A tale told by pirates.", &[]))
            .unwrap();
        index.commit().unwrap();

        let hits = index.search("pirates", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_lenient_query() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("keyword")).unwrap();

        index
            .insert(1, &entry("Robin Hood", "Outlaw of Sherwood.", &[]))
            .unwrap();
        index.commit().unwrap();

        // Unbalanced quote and a dangling field prefix
        assert!(index.search("\"robin (hood", 10).is_ok());
        assert!(index.search("title:", 10).is_ok());
        assert!(index.search("   ", 10).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_keeps_documents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("keyword");

        {
            let mut index = KeywordIndex::new(path.clone()).unwrap();
            index
                .insert(7, &entry("Nosferatu", "A vampire comes to town.", &[]))
                .unwrap();
            index.commit().unwrap();
        }

        let index = KeywordIndex::new(path).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.search("vampire", 5).unwrap()[0].id, 7);
    }

    #[test]
    fn test_contains_and_clear() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::new(temp.path().join("keyword")).unwrap();

        index
            .insert(3, &entry("Metropolis", "A city of machines.", &[]))
            .unwrap();
        // Uncommitted documents are not visible yet
        assert!(!index.contains(3).unwrap());

        index.commit().unwrap();
        assert!(index.contains(3).unwrap());
        assert!(!index.contains(4).unwrap());

        index.clear().unwrap();
        index.commit().unwrap();
        assert!(index.is_empty());
        assert!(!index.contains(3).unwrap());
    }
}

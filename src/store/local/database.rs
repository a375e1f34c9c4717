//! SQLite database management with migrations
//!
//! Holds movie records and their embedding vectors for the embedded store

use super::KeywordEntry;
use crate::store::{MovieMatch, StoreError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

type Result<T> = std::result::Result<T, StoreError>;

const MOVIE_COLUMNS: &str = "id, doc_key, title, text, plot, year, genres, cast_members";

/// Movie record as stored
#[derive(Debug, Clone)]
pub struct MovieRow {
    pub id: i64,
    pub doc_key: String,
    pub title: String,
    pub text: String,
    pub plot: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub cast: Vec<String>,
}

impl MovieRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let genres: String = row.get(6)?;
        let cast: String = row.get(7)?;
        Ok(Self {
            id: row.get(0)?,
            doc_key: row.get(1)?,
            title: row.get(2)?,
            text: row.get(3)?,
            plot: row.get(4)?,
            year: row.get(5)?,
            genres: serde_json::from_str(&genres).unwrap_or_default(),
            cast: serde_json::from_str(&cast).unwrap_or_default(),
        })
    }

    /// Value of a searchable column by name
    pub fn column(&self, name: &str) -> String {
        match name {
            "title" => self.title.clone(),
            "text" => self.text.clone(),
            "plot" => self.plot.clone(),
            "genres" => self.genres.join(" "),
            "cast" => self.cast.join(" "),
            _ => String::new(),
        }
    }

    /// Keyword index fields for this row
    pub fn keyword_entry(&self) -> KeywordEntry<'_> {
        KeywordEntry {
            title: &self.title,
            text: &self.text,
            genres: &self.genres,
            cast: &self.cast,
        }
    }

    pub fn into_match(self, score: f32) -> MovieMatch {
        MovieMatch {
            id: self.doc_key,
            text: self.text,
            title: self.title,
            year: self.year,
            genres: self.genres,
            cast: self.cast,
            score,
        }
    }
}

/// Movie record to insert
#[derive(Debug, Clone)]
pub struct NewMovie {
    pub doc_key: String,
    pub title: String,
    pub text: String,
    pub plot: String,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub cast: Vec<String>,
}

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| StoreError::Pool(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| StoreError::Pool(format!("Failed to get connection: {}", e)))?;

            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };

        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| StoreError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert a movie unless its key is already known
    ///
    /// Returns the new row id, or `None` when the key already exists.
    pub fn insert_movie(&self, movie: &NewMovie) -> Result<Option<i64>> {
        let conn = self.get_conn()?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO movies (doc_key, title, text, plot, year, genres, cast_members)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                movie.doc_key,
                movie.title,
                movie.text,
                movie.plot,
                movie.year,
                serde_json::to_string(&movie.genres).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(&movie.cast).unwrap_or_else(|_| "[]".to_string()),
            ],
        )?;

        if inserted == 0 {
            Ok(None)
        } else {
            Ok(Some(conn.last_insert_rowid()))
        }
    }

    /// Fetch movies by row id, preserving the order of `ids`
    pub fn get_movies(&self, ids: &[i64]) -> Result<Vec<MovieRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM movies WHERE id IN ({})",
            MOVIE_COLUMNS, placeholders
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(ids.iter()), MovieRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut by_id: HashMap<i64, MovieRow> = rows.into_iter().map(|r| (r.id, r)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// All movies in insertion order
    pub fn all_movies(&self) -> Result<Vec<MovieRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM movies ORDER BY id", MOVIE_COLUMNS))?;
        let rows = stmt
            .query_map([], MovieRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Random sample of up to `limit` movies
    pub fn sample_movies(&self, limit: usize) -> Result<Vec<MovieRow>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM movies ORDER BY RANDOM() LIMIT ?1",
            MOVIE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], MovieRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Row id for a document key
    pub fn movie_id(&self, doc_key: &str) -> Result<Option<i64>> {
        let conn = self.get_conn()?;
        let id = conn
            .query_row(
                "SELECT id FROM movies WHERE doc_key = ?1",
                params![doc_key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Movies with non-empty text and no stored vector
    pub fn movies_without_vectors(&self) -> Result<Vec<(i64, String, String)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.id, m.doc_key, m.text FROM movies m
             LEFT JOIN vectors v ON v.movie_id = m.id
             WHERE v.movie_id IS NULL AND m.text != ''
             ORDER BY m.id",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Store a vector for a movie; existing vectors are left untouched
    ///
    /// Returns whether a row was written.
    pub fn insert_vector(&self, movie_id: i64, vector: &[f32]) -> Result<bool> {
        let conn = self.get_conn()?;
        let written = conn.execute(
            "INSERT OR IGNORE INTO vectors (movie_id, vector, dimension, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                movie_id,
                encode_vector(vector),
                vector.len() as i64,
                chrono::Utc::now().timestamp()
            ],
        )?;
        Ok(written > 0)
    }

    /// All stored vectors
    pub fn all_vectors(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare("SELECT movie_id, vector FROM vectors ORDER BY movie_id")?;
        let rows = stmt
            .query_map([], |row| {
                let blob: Vec<u8> = row.get(1)?;
                Ok((row.get(0)?, decode_vector(&blob)))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let movie_count: i64 = conn.query_row("SELECT COUNT(*) FROM movies", [], |row| row.get(0))?;
        let vector_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;

        Ok(DbStats {
            movie_count: movie_count as usize,
            vector_count: vector_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub movie_count: usize,
    pub vector_count: usize,
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE movies (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doc_key TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        text TEXT NOT NULL,
        plot TEXT NOT NULL DEFAULT '',
        year INTEGER,
        genres TEXT NOT NULL DEFAULT '[]',   -- JSON array
        cast_members TEXT NOT NULL DEFAULT '[]'  -- JSON array
    );

    CREATE INDEX idx_movies_title ON movies(title);

    CREATE TABLE vectors (
        movie_id INTEGER PRIMARY KEY,
        vector BLOB NOT NULL,
        dimension INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (movie_id) REFERENCES movies(id) ON DELETE CASCADE
    );
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn movie(key: &str, title: &str) -> NewMovie {
        NewMovie {
            doc_key: key.to_string(),
            title: title.to_string(),
            text: format!("{} full plot", title),
            plot: String::new(),
            year: Some(1922),
            genres: vec!["Adventure".to_string()],
            cast: vec!["Douglas Fairbanks".to_string()],
        }
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_insert_is_idempotent_by_key() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        let first = db.insert_movie(&movie("a1", "Robin Hood")).unwrap();
        let second = db.insert_movie(&movie("a1", "Robin Hood")).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(db.stats().unwrap().movie_count, 1);
    }

    #[test]
    fn test_get_movies_preserves_order() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        let a = db.insert_movie(&movie("a", "Robin Hood")).unwrap().unwrap();
        let b = db.insert_movie(&movie("b", "The Black Pirate")).unwrap().unwrap();

        let rows = db.get_movies(&[b, a]).unwrap();
        assert_eq!(rows[0].title, "The Black Pirate");
        assert_eq!(rows[1].title, "Robin Hood");
        assert_eq!(rows[1].genres, vec!["Adventure".to_string()]);
    }

    #[test]
    fn test_vectors_skip_existing() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();

        let id = db.insert_movie(&movie("a", "Robin Hood")).unwrap().unwrap();
        assert_eq!(db.movies_without_vectors().unwrap().len(), 1);

        assert!(db.insert_vector(id, &[0.5, -0.25]).unwrap());
        assert!(!db.insert_vector(id, &[1.0, 1.0]).unwrap());

        assert!(db.movies_without_vectors().unwrap().is_empty());
        assert_eq!(db.all_vectors().unwrap(), vec![(id, vec![0.5, -0.25])]);
    }
}

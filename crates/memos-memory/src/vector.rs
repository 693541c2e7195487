//! Vector index capability and its SQLite-backed implementation.
//!
//! A [`VectorIndex`] stores text documents under stable string ids together
//! with a JSON metadata map and answers nearest-neighbour queries by text.
//! The memory stores only ever talk to the trait, so a remote vector database
//! or a scripted test double can be swapped in.
//!
//! # Storage layout
//!
//! [`VectorDatabase`] owns one SQLite file.  Every collection obtained through
//! [`VectorDatabase::collection`] lives in its own table `vec_<name>`:
//!
//! | column    | type | description                                    |
//! |-----------|------|------------------------------------------------|
//! | id        | TEXT | caller-chosen primary key                      |
//! | document  | TEXT | the indexed text                               |
//! | metadata  | TEXT | JSON object                                    |
//! | embedding | BLOB | little-endian f32 vector (4 × N bytes)         |
//!
//! Distances are cosine distances, `1 − cos(a, b)`, in `[0, 2]`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use memos_memory::embedding::HashEmbedder;
//! use memos_memory::vector::{VectorDatabase, VectorIndex, VectorRecord};
//!
//! # tokio_test_block(async {
//! let db = VectorDatabase::open_in_memory(Arc::new(HashEmbedder::default())).unwrap();
//! let facts = db.collection("semantic_memory").unwrap();
//! facts.insert(VectorRecord::new("fact_1", "User is allergic to peanuts")).await.unwrap();
//!
//! let hits = facts.query("peanuts allergy", 1).await.unwrap();
//! assert_eq!(hits[0].id, "fact_1");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::embedding::{Embedder, EmbeddingError};

/// Free-form metadata attached to every record.
pub type Metadata = Map<String, Value>;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from vector index operations.
#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("Metadata serialisation error: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("Record id already exists: {0}")]
    DuplicateId(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),
    #[error("Vector database lock poisoned")]
    Poisoned,
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A document stored in a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
}

impl VectorRecord {
    pub fn new(id: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            document: document.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A query result: the stored record plus its distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub distance: f32,
}

impl VectorHit {
    /// Read an unsigned integer metadata field, defaulting to `0`.
    pub fn meta_u64(&self, key: &str) -> u64 {
        self.metadata.get(key).and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability trait
// ─────────────────────────────────────────────────────────────────────────────

/// Nearest-neighbour text index with stable ids.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert a new record.  Fails with [`VectorIndexError::DuplicateId`] if
    /// the id is already present.
    async fn insert(&self, record: VectorRecord) -> Result<(), VectorIndexError>;

    /// Insert or wholly replace the record stored under `record.id`.
    async fn upsert(&self, record: VectorRecord) -> Result<(), VectorIndexError>;

    /// Replace the metadata of an existing record, keeping its document and
    /// embedding.
    async fn update_metadata(&self, id: &str, metadata: Metadata) -> Result<(), VectorIndexError>;

    /// Return up to `top_k` records ordered by ascending distance to `text`.
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorHit>, VectorIndexError>;

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>, VectorIndexError>;

    async fn count(&self) -> Result<usize, VectorIndexError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Cosine distance, `1 − cosine_similarity`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

// ─────────────────────────────────────────────────────────────────────────────
// VectorDatabase
// ─────────────────────────────────────────────────────────────────────────────

/// One SQLite file holding any number of named collections.
#[derive(Clone)]
pub struct VectorDatabase {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
}

impl VectorDatabase {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self, VectorIndexError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self, VectorIndexError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
        })
    }

    /// Get or create the collection `name`.
    ///
    /// Names are restricted to ASCII alphanumerics and `_` because they are
    /// spliced into the table name.
    pub fn collection(&self, name: &str) -> Result<SqliteVectorIndex, VectorIndexError> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(VectorIndexError::InvalidCollection(name.to_string()));
        }
        let table = format!("vec_{name}");
        {
            let conn = self.conn.lock().map_err(|_| VectorIndexError::Poisoned)?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id        TEXT NOT NULL PRIMARY KEY,
                    document  TEXT NOT NULL,
                    metadata  TEXT NOT NULL,
                    embedding BLOB NOT NULL
                );"
            ))?;
        }
        Ok(SqliteVectorIndex {
            conn: Arc::clone(&self.conn),
            embedder: Arc::clone(&self.embedder),
            table,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SqliteVectorIndex
// ─────────────────────────────────────────────────────────────────────────────

/// A single collection inside a [`VectorDatabase`].
///
/// Queries are brute-force: every stored embedding is scored against the
/// query embedding.  Stored vectors whose dimension differs from the query's
/// are skipped.
pub struct SqliteVectorIndex {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
    table: String,
}

impl SqliteVectorIndex {
    fn write(&self, record: &VectorRecord, embedding: &[f32], replace: bool) -> Result<(), VectorIndexError> {
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        let metadata = serde_json::to_string(&record.metadata)?;
        let conn = self.conn.lock().map_err(|_| VectorIndexError::Poisoned)?;
        let result = conn.execute(
            &format!(
                "{verb} INTO {} (id, document, metadata, embedding) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![record.id, record.document, metadata, embedding_to_bytes(embedding)],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(VectorIndexError::DuplicateId(record.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn insert(&self, record: VectorRecord) -> Result<(), VectorIndexError> {
        let embedding = self.embedder.embed(&record.document).await?;
        self.write(&record, &embedding, false)
    }

    async fn upsert(&self, record: VectorRecord) -> Result<(), VectorIndexError> {
        let embedding = self.embedder.embed(&record.document).await?;
        self.write(&record, &embedding, true)
    }

    async fn update_metadata(&self, id: &str, metadata: Metadata) -> Result<(), VectorIndexError> {
        let raw = serde_json::to_string(&metadata)?;
        let conn = self.conn.lock().map_err(|_| VectorIndexError::Poisoned)?;
        let changed = conn.execute(
            &format!("UPDATE {} SET metadata = ?1 WHERE id = ?2", self.table),
            params![raw, id],
        )?;
        if changed == 0 {
            return Err(VectorIndexError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<VectorHit>, VectorIndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(text).await?;

        let rows = {
            let conn = self.conn.lock().map_err(|_| VectorIndexError::Poisoned)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT id, document, metadata, embedding FROM {}",
                self.table
            ))?;
            let mapped = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Vec<u8>>(3)?,
                ))
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        let mut hits = Vec::with_capacity(rows.len());
        for (id, document, metadata, blob) in rows {
            let embedding = bytes_to_embedding(&blob);
            if embedding.len() != query_embedding.len() {
                continue;
            }
            hits.push(VectorHit {
                id,
                document,
                metadata: serde_json::from_str(&metadata)?,
                distance: cosine_distance(&embedding, &query_embedding),
            });
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn get(&self, id: &str) -> Result<Option<VectorRecord>, VectorIndexError> {
        let row = {
            let conn = self.conn.lock().map_err(|_| VectorIndexError::Poisoned)?;
            conn.query_row(
                &format!("SELECT document, metadata FROM {} WHERE id = ?1", self.table),
                params![id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
        };
        row.map(|(document, metadata)| {
            Ok(VectorRecord {
                id: id.to_string(),
                document,
                metadata: serde_json::from_str(&metadata)?,
            })
        })
        .transpose()
    }

    async fn count(&self) -> Result<usize, VectorIndexError> {
        let conn = self.conn.lock().map_err(|_| VectorIndexError::Poisoned)?;
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| {
            row.get(0)
        })?;
        Ok(n as usize)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! SQLite storage backend.
//!
//! One database file with tables for insights (ideas), topics, edges, and
//! idea_relations. Thread-safe via an internal mutex on the connection;
//! engine operations that mutate state lock once and run inside a single
//! `rusqlite::Transaction` so a request's writes commit or roll back
//! together. Centroid rows are never cached in-process — every
//! read-modify-write goes back through the store.

pub mod idea_store;
pub mod relation_store;
pub mod topic_store;

pub use idea_store::{IdeaScope, ScoredIdea};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unique-index violation on the normalized text key. The ingest
    /// pipeline resolves this by re-reading the surviving row.
    #[error("duplicate text key: {0}")]
    DuplicateKey(String),

    #[error("date parsing error: {0}")]
    DateParse(String),

    #[error("row decode error: {0}")]
    Decode(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// SQLite-backed store for the idea atlas.
///
/// Uses WAL mode for concurrent reads during writes. The duplicate key is
/// persisted as its own column (`text_key`) and protected by a unique
/// index, since SQLite cannot express the normalization inline.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (useful for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection for a sequence of statements. Mutating callers
    /// open a transaction on the guard; the lock is never held across an
    /// oracle call.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            -- Topic tree (level 1..3, node-with-parent-id)
            CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                level INTEGER NOT NULL,
                name TEXT NOT NULL,
                centroid_embedding BLOB NOT NULL,
                n_points INTEGER NOT NULL DEFAULT 1,
                parent_topic_id TEXT REFERENCES topics(id),
                stance_centroids_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_topics_scope
                ON topics(level, parent_topic_id);

            -- Ideas
            CREATE TABLE IF NOT EXISTS insights (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                text TEXT NOT NULL,
                text_key TEXT NOT NULL,
                embedding BLOB NOT NULL,
                cluster_id TEXT NOT NULL DEFAULT '',
                topic_id TEXT REFERENCES topics(id),
                subtopic_id TEXT REFERENCES topics(id),
                stance_label TEXT NOT NULL DEFAULT 'neutral',
                stance_confidence REAL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            -- Database-level duplicate protection on the normalized key
            CREATE UNIQUE INDEX IF NOT EXISTS insights_text_norm_uidx
                ON insights(text_key);
            CREATE INDEX IF NOT EXISTS idx_insights_topic
                ON insights(topic_id);
            CREATE INDEX IF NOT EXISTS idx_insights_subtopic
                ON insights(subtopic_id);

            -- Mirrored idea-to-idea edges
            CREATE TABLE IF NOT EXISTS edges (
                src TEXT NOT NULL REFERENCES insights(id),
                dst TEXT NOT NULL REFERENCES insights(id),
                weight REAL NOT NULL,
                edge_type TEXT NOT NULL DEFAULT 'idea_similarity',
                created_at TEXT NOT NULL,
                PRIMARY KEY (src, dst)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(edge_type);
            CREATE INDEX IF NOT EXISTS idx_edges_weight ON edges(weight);

            -- Directed cache of LLM pair judgments
            CREATE TABLE IF NOT EXISTS idea_relations (
                src_id TEXT NOT NULL REFERENCES insights(id),
                dst_id TEXT NOT NULL REFERENCES insights(id),
                relation_label TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (src_id, dst_id)
            );

            PRAGMA foreign_keys = ON;

            -- WAL for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Column codecs shared by the store modules
// ---------------------------------------------------------------------------

/// Encode an embedding as little-endian f32 bytes.
pub(crate) fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

/// Decode little-endian f32 bytes back into an embedding.
pub(crate) fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Timestamps persist as RFC 3339 strings.
pub(crate) fn ts_to_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

pub(crate) fn text_to_ts(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(format!("{raw}: {e}")))
}

/// True when the error is a unique/constraint violation (the losing side
/// of a duplicate race).
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, params};

use super::{
    FetchedRecord, Include, Metadata, Record, ScoredRecord, VectorStore, VectorStoreError,
};
use crate::embedding::cosine_similarity;

/// SQLite-backed vector store.
///
/// Stores embeddings as blobs alongside the document text and JSON metadata.
/// Records of every collection share one table; rows are keyed by
/// `(collection, id)`. Similarity search is brute-force cosine computed in Rust.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    collection: String,
    dimensions: usize,
}

impl SqliteVectorStore {
    /// Open (or create) a vector store database at `path`.
    pub fn open(path: &Path, collection: &str, dimensions: usize) -> Result<Self, VectorStoreError> {
        let conn = Connection::open(path)
            .map_err(|e| VectorStoreError::StorageError(format!("failed to open database: {e}")))?;
        Self::with_connection(conn, collection, dimensions)
    }

    /// Open an in-memory vector store (for testing).
    pub fn open_in_memory(collection: &str, dimensions: usize) -> Result<Self, VectorStoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VectorStoreError::StorageError(format!("failed to open in-memory db: {e}")))?;
        Self::with_connection(conn, collection, dimensions)
    }

    fn with_connection(
        conn: Connection,
        collection: &str,
        dimensions: usize,
    ) -> Result<Self, VectorStoreError> {
        let store = Self {
            conn: Mutex::new(conn),
            collection: collection.to_string(),
            dimensions,
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), VectorStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                embedding BLOB NOT NULL,
                document TEXT NOT NULL,
                metadata TEXT NOT NULL,
                dimensions INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (collection, id)
            );
            ",
        )
        .map_err(|e| VectorStoreError::StorageError(format!("migration failed: {e}")))?;
        Ok(())
    }

    fn check_dimensions(&self, len: usize) -> Result<(), VectorStoreError> {
        if len != self.dimensions {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimensions,
                got: len,
            });
        }
        Ok(())
    }
}

/// Encode a `Vec<f32>` as a little-endian byte blob.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &v in embedding {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian byte blob back into `Vec<f32>`.
fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn parse_metadata(json: &str) -> Result<Metadata, VectorStoreError> {
    serde_json::from_str(json)
        .map_err(|e| VectorStoreError::StorageError(format!("invalid metadata JSON: {e}")))
}

impl VectorStore for SqliteVectorStore {
    fn upsert(&self, record: Record) -> Result<(), VectorStoreError> {
        self.check_dimensions(record.embedding.len())?;

        let conn = self.conn.lock().unwrap();
        let blob = embedding_to_bytes(&record.embedding);
        let metadata_json = serde_json::to_string(&record.metadata)
            .map_err(|e| VectorStoreError::StorageError(format!("failed to serialize metadata: {e}")))?;
        let now = Utc::now().to_rfc3339();

        // Updating in place keeps the row's position in insertion order.
        conn.execute(
            "INSERT INTO records (collection, id, embedding, document, metadata, dimensions, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (collection, id) DO UPDATE SET
                embedding = excluded.embedding,
                document = excluded.document,
                metadata = excluded.metadata,
                dimensions = excluded.dimensions,
                updated_at = excluded.updated_at",
            params![
                self.collection,
                record.id,
                blob,
                record.document,
                metadata_json,
                self.dimensions as i64,
                now,
            ],
        )
        .map_err(|e| VectorStoreError::StorageError(format!("failed to upsert record: {e}")))?;

        Ok(())
    }

    fn nearest_neighbors(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimensions(embedding.len())?;

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, embedding, document, metadata FROM records
                 WHERE collection = ?1 ORDER BY seq",
            )
            .map_err(|e| VectorStoreError::StorageError(format!("failed to prepare search: {e}")))?;

        let rows = stmt
            .query_map(params![self.collection], |row| {
                let id: String = row.get(0)?;
                let blob: Vec<u8> = row.get(1)?;
                let document: String = row.get(2)?;
                let metadata_json: String = row.get(3)?;
                Ok((id, blob, document, metadata_json))
            })
            .map_err(|e| VectorStoreError::StorageError(format!("search query failed: {e}")))?;

        let mut scored: Vec<ScoredRecord> = Vec::new();
        for row in rows {
            let (id, blob, document, metadata_json) = row
                .map_err(|e| VectorStoreError::StorageError(format!("failed to read row: {e}")))?;
            let score = cosine_similarity(embedding, &bytes_to_embedding(&blob));
            scored.push(ScoredRecord {
                id,
                document,
                metadata: parse_metadata(&metadata_json)?,
                score,
            });
        }

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored)
    }

    fn fetch_all(&self, include: Include) -> Result<Vec<FetchedRecord>, VectorStoreError> {
        let embedding_col = if include.embeddings { "embedding" } else { "NULL" };
        let document_col = if include.documents { "document" } else { "NULL" };
        let metadata_col = if include.metadatas { "metadata" } else { "NULL" };
        let sql = format!(
            "SELECT id, {embedding_col}, {document_col}, {metadata_col} FROM records
             WHERE collection = ?1 ORDER BY seq"
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| VectorStoreError::StorageError(format!("failed to prepare fetch_all: {e}")))?;

        let rows = stmt
            .query_map(params![self.collection], |row| {
                let id: String = row.get(0)?;
                let blob: Option<Vec<u8>> = row.get(1)?;
                let document: Option<String> = row.get(2)?;
                let metadata_json: Option<String> = row.get(3)?;
                Ok((id, blob, document, metadata_json))
            })
            .map_err(|e| VectorStoreError::StorageError(format!("fetch_all query failed: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, blob, document, metadata_json) = row
                .map_err(|e| VectorStoreError::StorageError(format!("failed to read row: {e}")))?;
            let metadata = match metadata_json {
                Some(json) => Some(parse_metadata(&json)?),
                None => None,
            };
            records.push(FetchedRecord {
                id,
                embedding: blob.map(|b| bytes_to_embedding(&b)),
                document,
                metadata,
            });
        }
        Ok(records)
    }

    fn reset_collection(&self) -> Result<(), VectorStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM records WHERE collection = ?1",
            params![self.collection],
        )
        .map_err(|e| VectorStoreError::StorageError(format!("failed to reset collection: {e}")))?;
        Ok(())
    }

    fn count(&self) -> Result<usize, VectorStoreError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM records WHERE collection = ?1",
            params![self.collection],
            |row| row.get(0),
        )
        .map_err(|e| VectorStoreError::StorageError(format!("failed to count records: {e}")))
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}

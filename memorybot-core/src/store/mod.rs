pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Record metadata: flat string values, list fields joined with `", "`.
pub type Metadata = BTreeMap<String, String>;

/// Metadata keys written at ingestion time.
pub mod keys {
    pub const IMAGE_PATH: &str = "image_path";
    pub const DETECTED_OBJECTS: &str = "detected_objects";
    pub const COLOR_PALETTE: &str = "color_palette";
    pub const TAGS: &str = "tags";
    pub const POTENTIAL_USE_CASES: &str = "potential_use_cases";
}

/// Separator used for list-valued metadata fields.
pub const LIST_SEPARATOR: &str = ", ";

/// Errors that can occur during vector store operations.
#[derive(Debug)]
pub enum VectorStoreError {
    /// A general storage failure (I/O, SQL, etc.).
    StorageError(String),
    /// Embedding dimension does not match the store's configured dimension.
    DimensionMismatch { expected: usize, got: usize },
}

impl fmt::Display for VectorStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageError(msg) => write!(f, "storage error: {msg}"),
            Self::DimensionMismatch { expected, got } => {
                write!(f, "dimension mismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for VectorStoreError {}

/// A complete record to be written to the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    pub embedding: Vec<f32>,
    pub document: String,
    pub metadata: Metadata,
}

/// Facets requested from `fetch_all`. Facets left out are not read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Include {
    pub embeddings: bool,
    pub documents: bool,
    pub metadatas: bool,
}

impl Include {
    pub const ALL: Include = Include {
        embeddings: true,
        documents: true,
        metadatas: true,
    };

    /// Documents and metadata, the facets normalization reads.
    pub const CONTENT: Include = Include {
        embeddings: false,
        documents: true,
        metadatas: true,
    };

    pub const METADATA: Include = Include {
        embeddings: false,
        documents: false,
        metadatas: true,
    };
}

/// A record as returned by `fetch_all`; unrequested facets are `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchedRecord {
    pub id: String,
    pub embedding: Option<Vec<f32>>,
    pub document: Option<String>,
    pub metadata: Option<Metadata>,
}

/// A nearest-neighbor hit with its similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredRecord {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Trait abstracting one named collection of a vector database.
///
/// `fetch_all` and `nearest_neighbors` return records in insertion order where
/// scores tie, so callers can rely on a stable native order.
pub trait VectorStore: Send + Sync {
    fn upsert(&self, record: Record) -> Result<(), VectorStoreError>;
    fn nearest_neighbors(
        &self,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError>;
    fn fetch_all(&self, include: Include) -> Result<Vec<FetchedRecord>, VectorStoreError>;
    /// Delete every record in the collection.
    fn reset_collection(&self) -> Result<(), VectorStoreError>;
    fn count(&self) -> Result<usize, VectorStoreError>;
    fn collection(&self) -> &str;
}

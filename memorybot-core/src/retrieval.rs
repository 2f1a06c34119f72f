//! Retrieval aggregator: turns raw vector-store records into per-image views.
//!
//! Normalization is partial-failure tolerant. A record without an
//! `image_path` is skipped and reported, and two records that rewrite to the
//! same serving path resolve last-write-wins in store order, with the
//! collision reported rather than silently dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::store::{
    FetchedRecord, Include, LIST_SEPARATOR, Metadata, ScoredRecord, VectorStore,
    VectorStoreError, keys,
};

/// Per-record normalization failures.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateError {
    /// The record's metadata has no `image_path`.
    MissingPath { id: String },
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingPath { id } => write!(f, "record '{id}' has no image_path"),
        }
    }
}

impl std::error::Error for AggregateError {}

/// Two records normalized to the same serving path; `kept_id` won.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateKeyCollision {
    pub image_path: String,
    pub replaced_id: String,
    pub kept_id: String,
}

impl fmt::Display for DuplicateKeyCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "records '{}' and '{}' both map to '{}'; keeping '{}'",
            self.replaced_id, self.kept_id, self.image_path, self.kept_id
        )
    }
}

/// Derived, display-ready view of one stored image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntry {
    pub id: String,
    pub image_path: String,
    pub document: String,
    pub tags: Vec<String>,
    pub color_palette: Vec<String>,
    pub detected_objects: Vec<String>,
    pub potential_use_cases: Vec<String>,
}

/// Result of normalizing one batch of records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub entries: BTreeMap<String, NormalizedEntry>,
    pub skipped: Vec<AggregateError>,
    pub collisions: Vec<DuplicateKeyCollision>,
}

/// Rewrites storage-relative image paths into serving-relative ones.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRewrite {
    pub storage_root: String,
    pub serving_root: String,
}

impl PathRewrite {
    pub fn new(storage_root: impl Into<String>, serving_root: impl Into<String>) -> Self {
        Self {
            storage_root: storage_root.into(),
            serving_root: serving_root.into(),
        }
    }

    /// Swap the storage-root prefix for the serving root. Paths outside the
    /// storage root are returned unchanged.
    pub fn apply(&self, path: &str) -> String {
        match path.strip_prefix(self.storage_root.as_str()) {
            Some(rest) if !self.storage_root.is_empty() => format!("{}{rest}", self.serving_root),
            _ => path.to_string(),
        }
    }
}

/// Split a `", "`-joined metadata field. Absent or empty yields an empty list.
pub fn split_list(field: Option<&str>) -> Vec<String> {
    match field {
        Some(value) if !value.is_empty() => {
            value.split(LIST_SEPARATOR).map(str::to_string).collect()
        }
        _ => Vec::new(),
    }
}

/// Inverse of [`split_list`], used when writing metadata.
pub fn join_list(items: &[String]) -> String {
    items.join(LIST_SEPARATOR)
}

fn metadata_field<'a>(metadata: Option<&'a Metadata>, key: &str) -> Option<&'a str> {
    metadata.and_then(|m| m.get(key)).map(String::as_str)
}

/// Normalize one record's facets into an entry.
pub fn normalize_record(
    id: &str,
    document: Option<&str>,
    metadata: Option<&Metadata>,
    rewrite: &PathRewrite,
) -> Result<NormalizedEntry, AggregateError> {
    let field = |key: &str| metadata_field(metadata, key);

    let stored_path = match field(keys::IMAGE_PATH) {
        Some(path) if !path.is_empty() => path,
        _ => return Err(AggregateError::MissingPath { id: id.to_string() }),
    };

    Ok(NormalizedEntry {
        id: id.to_string(),
        image_path: rewrite.apply(stored_path),
        document: document.unwrap_or_default().to_string(),
        tags: split_list(field(keys::TAGS)),
        color_palette: split_list(field(keys::COLOR_PALETTE)),
        detected_objects: split_list(field(keys::DETECTED_OBJECTS)),
        potential_use_cases: split_list(field(keys::POTENTIAL_USE_CASES)),
    })
}

/// Normalize a batch of records keyed by rewritten image path.
pub fn normalize(records: &[FetchedRecord], rewrite: &PathRewrite) -> Normalized {
    let mut out = Normalized::default();

    for record in records {
        let entry = match normalize_record(
            &record.id,
            record.document.as_deref(),
            record.metadata.as_ref(),
            rewrite,
        ) {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("skipping record: {err}");
                out.skipped.push(err);
                continue;
            }
        };

        let image_path = entry.image_path.clone();
        if let Some(previous) = out.entries.insert(image_path.clone(), entry) {
            let collision = DuplicateKeyCollision {
                image_path,
                replaced_id: previous.id,
                kept_id: record.id.clone(),
            };
            log::warn!("duplicate image path: {collision}");
            out.collisions.push(collision);
        }
    }

    out
}

/// A ranked search hit in display form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
    #[serde(flatten)]
    pub entry: NormalizedEntry,
    pub score: f32,
}

/// Normalize ranked hits, keeping their order. Hits without a path are
/// skipped.
pub fn normalize_hits(hits: &[ScoredRecord], rewrite: &PathRewrite) -> Vec<RankedEntry> {
    hits.iter()
        .filter_map(|hit| {
            match normalize_record(&hit.id, Some(&hit.document), Some(&hit.metadata), rewrite) {
                Ok(entry) => Some(RankedEntry {
                    entry,
                    score: hit.score,
                }),
                Err(err) => {
                    log::warn!("skipping hit: {err}");
                    None
                }
            }
        })
        .collect()
}

/// Gallery paths plus the collisions found while listing them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GalleryListing {
    pub paths: Vec<String>,
    pub collisions: Vec<DuplicateKeyCollision>,
}

/// List serving paths in store order, each once. A later record with an
/// already listed path is reported as a collision and keeps the first slot.
pub fn gallery_listing(records: &[FetchedRecord], rewrite: &PathRewrite) -> GalleryListing {
    let mut owners: std::collections::HashMap<String, String> = std::collections::HashMap::new();
    let mut listing = GalleryListing::default();

    for record in records {
        let stored = record
            .metadata
            .as_ref()
            .and_then(|m| m.get(keys::IMAGE_PATH))
            .filter(|p| !p.is_empty());
        let Some(stored) = stored else {
            log::warn!(
                "skipping record: {}",
                AggregateError::MissingPath {
                    id: record.id.clone()
                }
            );
            continue;
        };

        let path = rewrite.apply(stored);
        match owners.insert(path.clone(), record.id.clone()) {
            Some(previous) => {
                let collision = DuplicateKeyCollision {
                    image_path: path,
                    replaced_id: previous,
                    kept_id: record.id.clone(),
                };
                log::warn!("duplicate image path: {collision}");
                listing.collisions.push(collision);
            }
            None => listing.paths.push(path),
        }
    }

    listing
}

/// Fetches records from a store and normalizes them.
pub struct Aggregator {
    store: Arc<dyn VectorStore>,
    rewrite: PathRewrite,
}

impl Aggregator {
    pub fn new(store: Arc<dyn VectorStore>, rewrite: PathRewrite) -> Self {
        Self { store, rewrite }
    }

    pub fn rewrite(&self) -> &PathRewrite {
        &self.rewrite
    }

    pub fn fetch_all(&self, include: Include) -> Result<Vec<FetchedRecord>, VectorStoreError> {
        self.store.fetch_all(include)
    }

    /// Fetch documents and metadata for the whole collection and normalize them.
    pub fn normalized(&self) -> Result<Normalized, VectorStoreError> {
        let records = self.fetch_all(Include::CONTENT)?;
        Ok(normalize(&records, &self.rewrite))
    }

    /// Serving paths of every record, in store order. Records without a path
    /// are skipped; duplicate paths are listed once.
    pub fn image_paths(&self) -> Result<Vec<String>, VectorStoreError> {
        Ok(self.gallery()?.paths)
    }

    /// Like [`Aggregator::image_paths`], also returning the path collisions.
    pub fn gallery(&self) -> Result<GalleryListing, VectorStoreError> {
        let records = self.fetch_all(Include::METADATA)?;
        Ok(gallery_listing(&records, &self.rewrite))
    }

    /// Look up one image by its serving path.
    pub fn entry(&self, image_path: &str) -> Result<Option<NormalizedEntry>, VectorStoreError> {
        let mut normalized = self.normalized()?;
        Ok(normalized.entries.remove(image_path))
    }
}

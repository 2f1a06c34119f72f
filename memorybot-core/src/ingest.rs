//! Image ingestion: describe, analyze, embed, and store one image at a time.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::embedding::{EmbedError, Embedder};
use crate::retrieval::join_list;
use crate::store::{Metadata, Record, VectorStore, VectorStoreError, keys};
use crate::throttle::{RetryPolicy, Throttle};
use crate::vision::{ImageDescriber, MetadataAnalyzer, VisionError};

#[derive(Debug)]
pub enum IngestError {
    NotFound(PathBuf),
    Vision(VisionError),
    Embed(EmbedError),
    Store(VectorStoreError),
    Io(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "'{}' does not exist", path.display()),
            Self::Vision(e) => write!(f, "{e}"),
            Self::Embed(e) => write!(f, "embedding failed: {e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<VisionError> for IngestError {
    fn from(e: VisionError) -> Self {
        Self::Vision(e)
    }
}

impl From<EmbedError> for IngestError {
    fn from(e: EmbedError) -> Self {
        Self::Embed(e)
    }
}

impl From<VectorStoreError> for IngestError {
    fn from(e: VectorStoreError) -> Self {
        Self::Store(e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestFailure {
    pub path: String,
    pub reason: String,
}

/// Outcome of a bulk ingestion; one failed image never aborts the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<IngestFailure>,
}

impl IngestReport {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Stable record id for an image path, so re-ingesting replaces the record.
pub fn record_id(image_path: &str) -> String {
    hex::encode(Sha256::digest(image_path.as_bytes()))
}

/// True when `path` has one of `extensions` (case-insensitive, no dot).
pub fn has_image_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
}

/// Reduce an uploaded file name to a safe base name.
///
/// Directory components are dropped and anything outside `[A-Za-z0-9._-]`
/// becomes `_`. Hidden or empty names are rejected.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.starts_with('.') {
        None
    } else {
        Some(cleaned)
    }
}

pub struct Ingestor {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    describer: Arc<dyn ImageDescriber>,
    analyzer: Arc<dyn MetadataAnalyzer>,
    throttle: Arc<Throttle>,
    retry: RetryPolicy,
    language: String,
    extensions: Vec<String>,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        describer: Arc<dyn ImageDescriber>,
        analyzer: Arc<dyn MetadataAnalyzer>,
        throttle: Arc<Throttle>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            describer,
            analyzer,
            throttle,
            retry: RetryPolicy::from_config(config),
            language: config.language.clone(),
            extensions: config.extensions.clone(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Describe, analyze, embed, and upsert one image. Returns the record id.
    ///
    /// The path is stored as given and becomes the record's `image_path`.
    pub async fn ingest_image(&self, path: &Path) -> Result<String, IngestError> {
        if !path.is_file() {
            return Err(IngestError::NotFound(path.to_path_buf()));
        }
        let image_path = path.display().to_string();

        let description = self
            .retry
            .run(&self.throttle, &format!("describe {image_path}"), || {
                self.describer.describe(path)
            })
            .await?;
        let analysis = self
            .retry
            .run(&self.throttle, &format!("analyze {image_path}"), || {
                self.analyzer.analyze(path, &self.language)
            })
            .await?;
        let embedding = self.embedder.embed_image(path)?;

        let mut metadata = Metadata::new();
        metadata.insert(keys::IMAGE_PATH.into(), image_path.clone());
        metadata.insert(keys::DETECTED_OBJECTS.into(), join_list(&analysis.detected_objects));
        metadata.insert(keys::COLOR_PALETTE.into(), join_list(&analysis.color_palette));
        metadata.insert(keys::TAGS.into(), join_list(&analysis.tags));
        metadata.insert(
            keys::POTENTIAL_USE_CASES.into(),
            join_list(&analysis.potential_use_cases),
        );

        let id = record_id(&image_path);
        self.store.upsert(Record {
            id: id.clone(),
            embedding,
            document: description,
            metadata,
        })?;

        info!("ingested {image_path} as {id}");
        Ok(id)
    }

    /// Ingest every image under `dir`, sorted by path, one at a time.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestReport, IngestError> {
        if !dir.is_dir() {
            return Err(IngestError::NotFound(dir.to_path_buf()));
        }

        let mut report = IngestReport::default();
        let mut paths = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
                    warn!("cannot read {path}: {e}");
                    report.failed.push(IngestFailure {
                        path,
                        reason: IngestError::Io(e.to_string()).to_string(),
                    });
                    continue;
                }
            };
            if entry.file_type().is_file() && has_image_extension(entry.path(), &self.extensions) {
                paths.push(entry.into_path());
            }
        }

        info!("ingesting {} images from {}", paths.len(), dir.display());
        for path in paths {
            match self.ingest_image(&path).await {
                Ok(_) => report.succeeded.push(path.display().to_string()),
                Err(e) => {
                    warn!("failed to ingest {}: {e}", path.display());
                    report.failed.push(IngestFailure {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "ingestion finished: {} succeeded, {} failed",
            report.succeeded.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

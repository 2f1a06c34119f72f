//! Multimodal query fusion.
//!
//! A query carries text, an image, or both. Single-modality queries are a
//! plain nearest-neighbor search. When both are present the caller picks a
//! [`FusionStrategy`]:
//!
//! - `Score` runs one search per modality and ranks the union of hits by
//!   `text_weight * text_score + image_weight * image_score`, a missing side
//!   counting as zero.
//! - `Vector` blends the two query embeddings into one unit vector and runs a
//!   single search.
//!
//! The two strategies generally produce different rankings. Score fusion is
//! the default.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::embedding::{EmbedError, Embedder, normalize};
use crate::store::{ScoredRecord, VectorStore, VectorStoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    #[default]
    Score,
    Vector,
}

/// Per-modality weights, applied only when both modalities are present.
///
/// The sum is not required to be 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryWeights {
    pub text_weight: f32,
    pub image_weight: f32,
}

impl QueryWeights {
    pub fn new(text_weight: f32, image_weight: f32) -> Self {
        Self {
            text_weight,
            image_weight,
        }
    }
}

impl Default for QueryWeights {
    fn default() -> Self {
        Self::new(0.5, 0.5)
    }
}

/// Errors that can occur while answering a query.
#[derive(Debug)]
pub enum FusionError {
    /// Neither a text nor an image query was given.
    NoQueryProvided,
    /// The embedder or the vector store failed.
    ExternalService { service: &'static str, message: String },
}

impl FusionError {
    /// True for errors caused by the request itself rather than a backend.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::NoQueryProvided)
    }
}

impl fmt::Display for FusionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoQueryProvided => write!(f, "Please provide a text query or image to search."),
            Self::ExternalService { service, message } => write!(f, "{service} failed: {message}"),
        }
    }
}

impl std::error::Error for FusionError {}

impl From<EmbedError> for FusionError {
    fn from(e: EmbedError) -> Self {
        Self::ExternalService {
            service: "embedder",
            message: e.to_string(),
        }
    }
}

impl From<VectorStoreError> for FusionError {
    fn from(e: VectorStoreError) -> Self {
        Self::ExternalService {
            service: "vector store",
            message: e.to_string(),
        }
    }
}

/// A search request. Blank text counts as absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct Query<'a> {
    pub text: Option<&'a str>,
    pub image: Option<&'a Path>,
}

impl<'a> Query<'a> {
    pub fn new(text: Option<&'a str>, image: Option<&'a Path>) -> Self {
        Self {
            text: text.filter(|t| !t.trim().is_empty()),
            image,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.image.is_none()
    }
}

/// Ranked hits, best first, at most `top_k` long.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredRecord>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredRecord> {
        self.hits.iter()
    }
}

/// Combine two ranked hit lists by weighted score.
///
/// Candidates are first ordered text hits then image-only hits, each in store
/// order; the stable sort keeps that order among equal scores.
pub fn fuse_scores(
    text_hits: &[ScoredRecord],
    image_hits: &[ScoredRecord],
    weights: QueryWeights,
    top_k: usize,
) -> Vec<ScoredRecord> {
    let mut fused: Vec<ScoredRecord> = Vec::with_capacity(text_hits.len() + image_hits.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for hit in text_hits {
        if positions.contains_key(&hit.id) {
            continue;
        }
        positions.insert(hit.id.clone(), fused.len());
        fused.push(ScoredRecord {
            score: weights.text_weight * hit.score,
            ..hit.clone()
        });
    }

    let mut seen_image: std::collections::HashSet<&str> = std::collections::HashSet::new();
    for hit in image_hits {
        if !seen_image.insert(hit.id.as_str()) {
            continue;
        }
        let weighted = weights.image_weight * hit.score;
        match positions.get(&hit.id) {
            Some(&i) => fused[i].score += weighted,
            None => {
                positions.insert(hit.id.clone(), fused.len());
                fused.push(ScoredRecord {
                    score: weighted,
                    ..hit.clone()
                });
            }
        }
    }

    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(top_k);
    fused
}

/// Blend two query embeddings into one unit vector.
///
/// Vectors of different lengths are blended over the shorter length. A blend
/// that cancels to zero is returned as the zero vector.
pub fn fuse_vectors(text_vec: &[f32], image_vec: &[f32], weights: QueryWeights) -> Vec<f32> {
    let mut blended: Vec<f32> = text_vec
        .iter()
        .zip(image_vec)
        .map(|(t, i)| weights.text_weight * t + weights.image_weight * i)
        .collect();
    normalize(&mut blended);
    blended
}

/// Answers text, image, and combined queries against one vector store.
pub struct QueryFuser {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    candidate_multiplier: usize,
}

impl QueryFuser {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            candidate_multiplier: 1,
        }
    }

    /// Search each modality `multiplier` times deeper than `top_k` before
    /// score fusion. Values below 1 are treated as 1.
    pub fn with_candidate_multiplier(mut self, multiplier: usize) -> Self {
        self.candidate_multiplier = multiplier.max(1);
        self
    }

    pub fn search(
        &self,
        query: Query<'_>,
        top_k: usize,
        weights: QueryWeights,
        strategy: FusionStrategy,
    ) -> Result<RetrievalResult, FusionError> {
        if query.is_empty() {
            return Err(FusionError::NoQueryProvided);
        }
        if top_k == 0 {
            return Ok(RetrievalResult::default());
        }

        let hits = match (query.text, query.image) {
            (Some(text), None) => {
                let vector = self.embedder.embed_text(text)?;
                self.store.nearest_neighbors(&vector, top_k)?
            }
            (None, Some(image)) => {
                let vector = self.embedder.embed_image(image)?;
                self.store.nearest_neighbors(&vector, top_k)?
            }
            (Some(text), Some(image)) => {
                let text_vec = self.embedder.embed_text(text)?;
                let image_vec = self.embedder.embed_image(image)?;
                match strategy {
                    FusionStrategy::Score => {
                        let depth = top_k.saturating_mul(self.candidate_multiplier).max(top_k);
                        let text_hits = self.store.nearest_neighbors(&text_vec, depth)?;
                        let image_hits = self.store.nearest_neighbors(&image_vec, depth)?;
                        fuse_scores(&text_hits, &image_hits, weights, top_k)
                    }
                    FusionStrategy::Vector => {
                        let blended = fuse_vectors(&text_vec, &image_vec, weights);
                        self.store.nearest_neighbors(&blended, top_k)?
                    }
                }
            }
            (None, None) => unreachable!("empty query rejected above"),
        };

        log::debug!(
            "query text={:?} image={:?} strategy={strategy:?} returned {} hits",
            query.text,
            query.image.map(|p| p.display().to_string()),
            hits.len()
        );

        Ok(RetrievalResult { hits })
    }
}

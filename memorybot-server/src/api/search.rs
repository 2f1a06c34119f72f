use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use memorybot_core::chat::ReplyStatus;
use memorybot_core::fusion::{FusionError, FusionStrategy, Query, QueryWeights};
use memorybot_core::provider::Provider;
use memorybot_core::retrieval::{RankedEntry, normalize_hits};

use super::{ApiError, AppState};

/// Request body for `POST /api/search`.
#[derive(Serialize, Deserialize, Default)]
pub struct SearchRequest {
    #[serde(default)]
    pub text: Option<String>,
    /// File name of an image under `images_dir`.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default)]
    pub text_weight: Option<f32>,
    #[serde(default)]
    pub image_weight: Option<f32>,
    #[serde(default)]
    pub strategy: Option<FusionStrategy>,
}

#[derive(Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<RankedEntry>,
    pub status: ReplyStatus,
}

/// Fill unset weights from config, clamped to [0, 1].
pub(crate) fn request_weights(
    defaults: QueryWeights,
    text_weight: Option<f32>,
    image_weight: Option<f32>,
) -> QueryWeights {
    QueryWeights::new(
        text_weight.unwrap_or(defaults.text_weight).clamp(0.0, 1.0),
        image_weight.unwrap_or(defaults.image_weight).clamp(0.0, 1.0),
    )
}

/// `POST /api/search`: ranked results for a text and/or image query.
///
/// Search failures degrade to an empty result with a status message.
pub async fn search_handler<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, Json<ApiError>)> {
    let image = match req.image.as_deref().filter(|s| !s.is_empty()) {
        Some(name) => Some(state.resolve_image(name)?),
        None => None,
    };

    let top_k = req
        .top_k
        .map(|k| usize::try_from(k).unwrap_or(0))
        .unwrap_or(state.config.search.top_k);
    let weights = request_weights(state.config.search.weights(), req.text_weight, req.image_weight);
    let strategy = req.strategy.unwrap_or(state.config.search.strategy);

    let query = Query::new(req.text.as_deref(), image.as_deref());
    let (results, status) = match state.fuser.search(query, top_k, weights, strategy) {
        Ok(result) => (
            normalize_hits(&result.hits, state.aggregator.rewrite()),
            ReplyStatus::Ok,
        ),
        Err(FusionError::NoQueryProvided) => (Vec::new(), ReplyStatus::NoQuery),
        Err(e) => {
            log::error!("search failed: {e}");
            (
                Vec::new(),
                ReplyStatus::Degraded {
                    message: format!("Search is unavailable: {e}"),
                },
            )
        }
    };

    Ok(Json(SearchResponse { results, status }))
}

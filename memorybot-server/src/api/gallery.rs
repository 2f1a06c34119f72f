//! Gallery listing and per-image detail.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use serde::Deserialize;

use memorybot_core::provider::Provider;
use memorybot_core::retrieval::NormalizedEntry;
use memorybot_core::warning::{MISSING_PATH, PATH_COLLISION, Warning, WarningSeverity};

use super::{ApiError, AppState, internal_error, not_found_error};

/// `GET /api/gallery`: serving paths of every stored image.
///
/// Path collisions found while listing replace the current collision warnings.
pub async fn list_gallery<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
) -> Result<Json<Vec<String>>, (StatusCode, Json<ApiError>)> {
    let listing = state
        .aggregator
        .gallery()
        .map_err(|e| internal_error(format!("failed to list images: {e}")))?;

    state
        .warnings
        .write()
        .unwrap()
        .replace(PATH_COLLISION, listing.collisions.iter().map(Warning::from));
    Ok(Json(listing.paths))
}

#[derive(Deserialize)]
pub struct ImageQuery {
    pub image: String,
}

/// `GET /api/images?image=<serving path>`: normalized metadata for one image.
pub async fn get_image<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Query(query): Query<ImageQuery>,
) -> Result<Json<NormalizedEntry>, (StatusCode, Json<ApiError>)> {
    let mut normalized = state
        .aggregator
        .normalized()
        .map_err(|e| internal_error(format!("failed to load images: {e}")))?;

    {
        let mut warnings = state.warnings.write().unwrap();
        warnings.replace(
            PATH_COLLISION,
            normalized.collisions.iter().map(Warning::from),
        );
        warnings.replace(
            MISSING_PATH,
            normalized.skipped.iter().map(|e| Warning {
                code: MISSING_PATH.into(),
                message: e.to_string(),
                severity: WarningSeverity::Info,
            }),
        );
    }

    match normalized.entries.remove(&query.image) {
        Some(entry) => Ok(Json(entry)),
        None => Err(not_found_error(format!("image '{}' not found", query.image))),
    }
}

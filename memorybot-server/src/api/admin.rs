//! Collection maintenance endpoints.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use memorybot_core::ingest::{IngestError, IngestReport};
use memorybot_core::provider::Provider;
use memorybot_core::warning::{MISSING_PATH, PATH_COLLISION};

use super::{ApiError, AppState, internal_error, not_found_error};

#[derive(Serialize, Deserialize, Default)]
pub struct IngestRequest {
    /// Directory to ingest; defaults to `images_dir`.
    #[serde(default)]
    pub directory: Option<String>,
}

/// `POST /api/ingest`: ingest every image in a directory.
pub async fn ingest_handler<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestReport>, (StatusCode, Json<ApiError>)> {
    let dir = PathBuf::from(
        req.directory
            .unwrap_or_else(|| state.config.paths.images_dir.clone()),
    );
    match state.ingestor.ingest_directory(&dir).await {
        Ok(report) => Ok(Json(report)),
        Err(IngestError::NotFound(path)) => Err(not_found_error(format!(
            "directory '{}' not found",
            path.display()
        ))),
        Err(e) => Err(internal_error(e.to_string())),
    }
}

/// `DELETE /api/collection`: remove every record from the collection.
pub async fn reset_collection<P: Provider + 'static>(
    State(state): State<Arc<AppState<P>>>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    state
        .store
        .reset_collection()
        .map_err(|e| internal_error(format!("failed to reset collection: {e}")))?;

    let mut warnings = state.warnings.write().unwrap();
    warnings.clear(PATH_COLLISION);
    warnings.clear(MISSING_PATH);
    log::info!("collection '{}' reset", state.store.collection());
    Ok(StatusCode::NO_CONTENT)
}
